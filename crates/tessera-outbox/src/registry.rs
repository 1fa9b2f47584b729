use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::EventEnvelope;
use crate::error::{OutboxError, OutboxResult};

/// A handler that delivers outbox events to a downstream consumer.
///
/// Delivery is at-least-once: a publisher may see the same envelope
/// again if the process crashes between a successful `publish` and the
/// row being marked published. Implementations must tolerate replays.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Event types this publisher handles.
    fn event_types(&self) -> Vec<String>;

    /// Source module this publisher accepts events from.
    fn source(&self) -> String;

    async fn publish(&self, envelope: &EventEnvelope) -> OutboxResult<()>;
}

/// Immutable lookup table from (event type, source) to publisher.
///
/// Built once at startup via [`PublisherRegistryBuilder`]; registering
/// two publishers for the same pair is a construction error rather than
/// a silent override.
pub struct PublisherRegistry {
    publishers: HashMap<(String, String), Arc<dyn EventPublisher>>,
}

impl PublisherRegistry {
    pub fn builder() -> PublisherRegistryBuilder {
        PublisherRegistryBuilder {
            publishers: HashMap::new(),
        }
    }

    /// Exact-match lookup. No wildcard or prefix routing. Zero matches
    /// is `NoPublisher`, a retryable condition rather than a delivery
    /// failure.
    pub fn resolve(
        &self,
        event_type: &str,
        source: &str,
    ) -> OutboxResult<Arc<dyn EventPublisher>> {
        self.publishers
            .get(&(event_type.to_string(), source.to_string()))
            .cloned()
            .ok_or_else(|| OutboxError::NoPublisher {
                event_type: event_type.to_string(),
                event_source: source.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

pub struct PublisherRegistryBuilder {
    publishers: HashMap<(String, String), Arc<dyn EventPublisher>>,
}

impl PublisherRegistryBuilder {
    /// Registers a publisher under every (event type, source) pair it
    /// declares. Fails on the first duplicate pair.
    pub fn register(mut self, publisher: Arc<dyn EventPublisher>) -> OutboxResult<Self> {
        let source = publisher.source();
        for event_type in publisher.event_types() {
            let key = (event_type.clone(), source.clone());
            if self.publishers.contains_key(&key) {
                return Err(OutboxError::DuplicatePublisher {
                    event_type,
                    event_source: source,
                });
            }
            self.publishers.insert(key, Arc::clone(&publisher));
        }
        Ok(self)
    }

    pub fn build(self) -> PublisherRegistry {
        tracing::debug!(publishers = self.publishers.len(), "Publisher registry built");
        PublisherRegistry {
            publishers: self.publishers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubPublisher {
        event_types: Vec<String>,
        source: String,
    }

    #[async_trait]
    impl EventPublisher for StubPublisher {
        fn event_types(&self) -> Vec<String> {
            self.event_types.clone()
        }

        fn source(&self) -> String {
            self.source.clone()
        }

        async fn publish(&self, _envelope: &EventEnvelope) -> OutboxResult<()> {
            Ok(())
        }
    }

    fn stub(event_types: &[&str], source: &str) -> Arc<dyn EventPublisher> {
        Arc::new(StubPublisher {
            event_types: event_types.iter().map(|s| s.to_string()).collect(),
            source: source.to_string(),
        })
    }

    #[test]
    fn test_resolve_exact_match() {
        let registry = PublisherRegistry::builder()
            .register(stub(&["project.created", "project.deleted"], "projects"))
            .unwrap()
            .build();

        assert!(registry.resolve("project.created", "projects").is_ok());
        assert!(registry.resolve("project.deleted", "projects").is_ok());
        assert!(matches!(
            registry.resolve("project.created", "billing"),
            Err(OutboxError::NoPublisher { .. })
        ));
        assert!(matches!(
            registry.resolve("project.renamed", "projects"),
            Err(OutboxError::NoPublisher { .. })
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = PublisherRegistry::builder()
            .register(stub(&["usage.recorded"], "billing"))
            .unwrap()
            .register(stub(&["usage.recorded"], "billing"));

        assert!(matches!(
            result,
            Err(OutboxError::DuplicatePublisher { .. })
        ));
    }

    #[test]
    fn test_same_event_type_different_sources_allowed() {
        let registry = PublisherRegistry::builder()
            .register(stub(&["entity.updated"], "projects"))
            .unwrap()
            .register(stub(&["entity.updated"], "billing"))
            .unwrap()
            .build();

        assert_eq!(registry.len(), 2);
    }
}
