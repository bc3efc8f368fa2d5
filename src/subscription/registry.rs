//! Routing table from subscription id to sink.
//!
//! Ids are minted per connection as `sub-0`, `sub-1`, ... and never reused.
//! Once drained the registry is closed: the connection is going away and
//! nothing is left to fail a late subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::SubscriptionSink;
use crate::error::{Result, StompError};

#[derive(Default)]
struct Sinks {
    by_id: HashMap<String, Arc<SubscriptionSink>>,
    closed: bool,
}

/// Live subscriptions of one connection.
#[derive(Default)]
pub struct SubscriptionRegistry {
    sinks: Mutex<Sinks>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh subscription id.
    pub fn next_id(&self) -> String {
        format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Make `sink` routable.
    ///
    /// Fails with [`StompError::ConnectionClosed`] once the registry has
    /// been drained.
    pub fn insert(&self, sink: Arc<SubscriptionSink>) -> Result<()> {
        let mut sinks = self.lock();
        if sinks.closed {
            return Err(StompError::ConnectionClosed);
        }
        sinks.by_id.insert(sink.id().to_string(), sink);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<SubscriptionSink>> {
        self.lock().by_id.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SubscriptionSink>> {
        self.lock().by_id.remove(id)
    }

    /// Close the registry, removing and returning every subscription.
    pub fn drain(&self) -> Vec<Arc<SubscriptionSink>> {
        let mut sinks = self.lock();
        sinks.closed = true;
        sinks.by_id.drain().map(|(_, sink)| sink).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_id.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Sinks> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::AckMode;

    #[test]
    fn test_ids_are_sequential() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.next_id(), "sub-0");
        assert_eq!(registry.next_id(), "sub-1");
        assert_eq!(registry.next_id(), "sub-2");
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = SubscriptionRegistry::new();
        let (sink, _rx) = SubscriptionSink::new("sub-0", "/topic/a", AckMode::Auto, 1);

        registry.insert(sink).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("sub-0").unwrap().destination(), "/topic/a");
        assert!(registry.get("sub-9").is_none());

        assert!(registry.remove("sub-0").is_some());
        assert!(registry.remove("sub-0").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drain() {
        let registry = SubscriptionRegistry::new();
        for id in ["sub-0", "sub-1"] {
            let (sink, _rx) = SubscriptionSink::new(id, "/topic/a", AckMode::Auto, 1);
            registry.insert(sink).unwrap();
        }

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_insert_after_drain_refused() {
        let registry = SubscriptionRegistry::new();
        registry.drain();

        let (sink, _rx) = SubscriptionSink::new("sub-0", "/topic/a", AckMode::Auto, 1);
        assert!(matches!(registry.insert(sink), Err(StompError::ConnectionClosed)));
        assert!(registry.get("sub-0").is_none());
    }
}
