//! Reference counting and deferred eviction.
//!
//! Each live observer holds one reference on every entity its last read
//! touched. When an entity's count drops to zero it gets an eviction
//! deadline one grace period out; taking a new reference before the
//! deadline cancels it. Deadlines use `tokio::time::Instant` so a paused
//! test clock drives them.

use quarry_core::EntityId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct GarbageCollector {
    grace: Duration,
    refcounts: HashMap<EntityId, usize>,
    pending: HashMap<EntityId, Instant>,
}

impl GarbageCollector {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            refcounts: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Take a reference, cancelling any pending eviction.
    pub fn retain(&mut self, entity: &EntityId) {
        *self.refcounts.entry(entity.clone()).or_insert(0) += 1;
        if self.pending.remove(entity).is_some() {
            tracing::trace!(entity = %entity, "Eviction cancelled by new reference");
        }
    }

    /// Drop a reference; the last one schedules eviction.
    pub fn release(&mut self, entity: &EntityId) {
        let Some(count) = self.refcounts.get_mut(entity) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.refcounts.remove(entity);
            if !entity.is_root() {
                self.pending.insert(entity.clone(), Instant::now() + self.grace);
            }
        }
    }

    pub fn refcount(&self, entity: &EntityId) -> usize {
        self.refcounts.get(entity).copied().unwrap_or(0)
    }

    pub fn is_pending(&self, entity: &EntityId) -> bool {
        self.pending.contains_key(entity)
    }

    /// Remove and return every pending entity whose deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Vec<EntityId> {
        let due: Vec<EntityId> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &due {
            self.pending.remove(id);
        }
        due
    }

    pub fn forget(&mut self, entity: &EntityId) {
        self.pending.remove(entity);
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> EntityId {
        EntityId::keyed("User", ["1"])
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_release_schedules_eviction() {
        let mut gc = GarbageCollector::new(Duration::from_secs(10));
        gc.retain(&user());
        gc.retain(&user());
        gc.release(&user());
        assert!(!gc.is_pending(&user()));
        gc.release(&user());
        assert!(gc.is_pending(&user()));

        assert!(gc.take_due(Instant::now()).is_empty());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(gc.take_due(Instant::now()), vec![user()]);
        assert!(!gc.is_pending(&user()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retain_cancels_pending() {
        let mut gc = GarbageCollector::new(Duration::from_secs(10));
        gc.retain(&user());
        gc.release(&user());
        tokio::time::advance(Duration::from_secs(5)).await;
        gc.retain(&user());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(gc.take_due(Instant::now()).is_empty());
        assert_eq!(gc.refcount(&user()), 1);
    }

    #[test]
    fn test_root_is_never_scheduled() {
        let mut gc = GarbageCollector::new(Duration::from_secs(1));
        gc.retain(&EntityId::root());
        gc.release(&EntityId::root());
        assert!(!gc.is_pending(&EntityId::root()));
    }

    #[test]
    fn test_release_without_reference_is_noop() {
        let mut gc = GarbageCollector::new(Duration::from_secs(1));
        gc.release(&user());
        assert!(!gc.is_pending(&user()));
    }
}
