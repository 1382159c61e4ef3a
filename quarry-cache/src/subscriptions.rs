//! Observer registrations.
//!
//! An observer pairs a target record and selection with the dependency set
//! of its last read. Registrations are kept in a `BTreeMap` keyed by a
//! monotonically assigned id, so iterating it visits observers in the order
//! they subscribed.

use quarry_core::{EntityId, Selection, Variables};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::store::{FieldRef, Snapshot};

/// Callback invoked with each new snapshot.
pub type ChangeCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Identifier of one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

pub(crate) struct Subscription {
    pub target: EntityId,
    pub selection: Selection,
    pub variables: Variables,
    pub deps: HashSet<FieldRef>,
    pub entities: HashSet<EntityId>,
    pub sender: Arc<watch::Sender<Snapshot>>,
    pub callback: Option<ChangeCallback>,
}

impl Subscription {
    pub fn depends_on(&self, touched: &HashSet<FieldRef>) -> bool {
        if self.deps.len() <= touched.len() {
            self.deps.iter().any(|dep| touched.contains(dep))
        } else {
            touched.iter().any(|slot| self.deps.contains(slot))
        }
    }
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: u64,
    entries: BTreeMap<ObserverId, Subscription>,
}

impl SubscriptionRegistry {
    pub fn insert(&mut self, subscription: Subscription) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.entries.insert(id, subscription);
        id
    }

    pub fn remove(&mut self, id: ObserverId) -> Option<Subscription> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: ObserverId) -> Option<&Subscription> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: ObserverId) -> Option<&mut Subscription> {
        self.entries.get_mut(&id)
    }

    /// Observers whose dependencies intersect `touched`, in subscription order.
    pub fn affected(&self, touched: &HashSet<FieldRef>) -> Vec<ObserverId> {
        self.entries
            .iter()
            .filter(|(_, sub)| sub.depends_on(touched))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn ids(&self) -> Vec<ObserverId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Live view of one selection over the cache.
///
/// Dropping an observer does not unregister it; pass its id to
/// `Cache::unsubscribe` so its references are released.
#[derive(Debug, Clone)]
pub struct Observer {
    id: ObserverId,
    receiver: watch::Receiver<Snapshot>,
}

impl Observer {
    pub(crate) fn new(id: ObserverId, receiver: watch::Receiver<Snapshot>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next snapshot.
    ///
    /// Returns `None` once the observer has been unsubscribed.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// A receiver for consumers that want to drive the channel themselves.
    pub fn receiver(&self) -> watch::Receiver<Snapshot> {
        self.receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::FieldKey;

    fn subscription(deps: &[(&str, &str)]) -> Subscription {
        let (sender, _) = watch::channel(Snapshot::default());
        Subscription {
            target: EntityId::root(),
            selection: Selection::default(),
            variables: Variables::new(),
            deps: deps
                .iter()
                .map(|(id, field)| (EntityId::from_raw(*id), FieldKey::plain(*field)))
                .collect(),
            entities: HashSet::new(),
            sender: Arc::new(sender),
            callback: None,
        }
    }

    #[test]
    fn test_affected_in_subscription_order() {
        let mut registry = SubscriptionRegistry::default();
        let b = registry.insert(subscription(&[("User:1", "name")]));
        let _unrelated = registry.insert(subscription(&[("User:2", "name")]));
        let a = registry.insert(subscription(&[("User:1", "name"), ("User:1", "email")]));

        let touched: HashSet<FieldRef> =
            [(EntityId::from_raw("User:1"), FieldKey::plain("name"))].into_iter().collect();
        assert_eq!(registry.affected(&touched), vec![b, a]);
    }

    #[test]
    fn test_remove() {
        let mut registry = SubscriptionRegistry::default();
        let id = registry.insert(subscription(&[]));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert_eq!(registry.len(), 0);
    }
}
