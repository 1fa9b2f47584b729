use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Runtime switch for outbox dispatch.
///
/// While paused the dispatcher skips its polling work entirely; writers
/// keep appending rows and nothing is lost. Reads are lock-free so the
/// dispatcher can check it every tick.
#[derive(Clone)]
pub struct PublishingToggle {
    enabled: Arc<AtomicBool>,
}

impl PublishingToggle {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn pause(&self) {
        if self.enabled.swap(false, Ordering::Relaxed) {
            tracing::warn!("Outbox publishing paused; events will accumulate until resumed");
        }
    }

    pub fn resume(&self) {
        if !self.enabled.swap(true, Ordering::Relaxed) {
            tracing::info!("Outbox publishing resumed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_transitions() {
        let toggle = PublishingToggle::new(true);
        assert!(toggle.is_enabled());

        toggle.pause();
        assert!(!toggle.is_enabled());

        toggle.resume();
        assert!(toggle.is_enabled());
    }

    #[test]
    fn test_clones_share_state() {
        let toggle = PublishingToggle::new(true);
        let other = toggle.clone();

        other.pause();
        assert!(!toggle.is_enabled());
    }
}
