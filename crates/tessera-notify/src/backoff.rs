use std::time::Duration;

/// Exponential backoff for delivery retries.
///
/// Attempt 1 waits `base`, attempt 2 waits `2 * base`, doubling each
/// attempt, capped at `max`. The shift saturates so large attempt
/// numbers cannot overflow.
pub fn compute_backoff(attempt: i64, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 63) as u32;
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(factor).min(max_ms);
    Duration::from_millis(delay_ms)
}
