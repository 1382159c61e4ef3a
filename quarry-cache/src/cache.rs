//! The `Cache` facade.
//!
//! Composes the record store, list registry, staleness tracker, reference
//! counts and observer registrations behind one cheaply cloneable handle.
//!
//! Locking: the observer registry mutex is always taken before the store
//! lock. Every mutation runs and recomputes affected observers while holding
//! both, then releases them before snapshots are published and callbacks
//! run, so a callback may call back into the cache.

use quarry_core::{
    CacheConfig, EntityId, FieldKey, QuarryResult, Selection, StoreError, Variables,
};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::lists::{ListHandle, ListInstance, ListMutation, ListSelector, ParentScope};
use crate::stale::StaleScope;
use crate::stats::{CacheMetrics, CacheStats};
use crate::store::{FieldRef, ReadOutcome, Snapshot, StoreState};
use crate::subscriptions::{
    ChangeCallback, Observer, ObserverId, Subscription, SubscriptionRegistry,
};

/// What an observer reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadTarget {
    /// The root record (query documents).
    Root,
    /// One entity (fragment documents).
    Entity(EntityId),
}

impl ReadTarget {
    pub fn id(&self) -> EntityId {
        match self {
            Self::Root => EntityId::root(),
            Self::Entity(id) => id.clone(),
        }
    }
}

struct CacheInner {
    subscriptions: Mutex<SubscriptionRegistry>,
    state: RwLock<StoreState>,
    metrics: CacheMetrics,
}

/// Snapshot pending delivery once locks are released.
struct Delivery {
    id: ObserverId,
    sender: Arc<watch::Sender<Snapshot>>,
    callback: Option<ChangeCallback>,
    snapshot: Snapshot,
}

/// Normalized client-side cache.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("stats", &self.stats().ok())
            .finish_non_exhaustive()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::from_state(StoreState::new(CacheConfig::default()))
    }
}

impl Cache {
    /// Create a cache after validating `config`.
    pub fn new(config: CacheConfig) -> QuarryResult<Self> {
        config.validate()?;
        Ok(Self::from_state(StoreState::new(config)))
    }

    fn from_state(state: StoreState) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                subscriptions: Mutex::new(SubscriptionRegistry::default()),
                state: RwLock::new(state),
                metrics: CacheMetrics::new(),
            }),
        }
    }

    fn state(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.inner.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn state_mut(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.inner.state.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn subscriptions(&self) -> Result<MutexGuard<'_, SubscriptionRegistry>, StoreError> {
        self.inner
            .subscriptions
            .lock()
            .map_err(|_| StoreError::LockPoisoned)
    }

    pub fn config(&self) -> QuarryResult<CacheConfig> {
        Ok(self.state()?.config().clone())
    }

    // ========================================================================
    // READ / WRITE
    // ========================================================================

    /// Read `selection` from `target` without subscribing.
    pub fn read(
        &self,
        target: &EntityId,
        selection: &Selection,
        variables: &Variables,
    ) -> QuarryResult<ReadOutcome> {
        let outcome = self.state()?.read(target, selection, variables);
        self.inner.metrics.record_read(outcome.partial);
        Ok(outcome)
    }

    /// Read a query selection from the root record.
    pub fn read_query(&self, selection: &Selection, variables: &Variables) -> QuarryResult<ReadOutcome> {
        self.read(&EntityId::root(), selection, variables)
    }

    /// Normalize `data` into the store under `target`.
    ///
    /// Every observer whose dependencies intersect the written slots is
    /// refreshed before this returns. Returns the written slots.
    pub fn write(
        &self,
        target: &EntityId,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
    ) -> QuarryResult<HashSet<FieldRef>> {
        self.write_typed(target, None, selection, data, variables)
    }

    /// Write a query response at the root record.
    pub fn write_query(
        &self,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
    ) -> QuarryResult<HashSet<FieldRef>> {
        self.write(&EntityId::root(), selection, data, variables)
    }

    fn write_typed(
        &self,
        target: &EntityId,
        typename: Option<&str>,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
    ) -> QuarryResult<HashSet<FieldRef>> {
        self.mutate(|state| {
            let touched = state.write(target, typename, selection, data, variables)?;
            Ok((touched.clone(), touched))
        })
    }

    /// Remove an entity and strip it from every list.
    ///
    /// Returns whether the entity existed.
    pub fn delete(&self, id: &EntityId) -> QuarryResult<bool> {
        self.mutate(|state| {
            let existed = state.contains(id);
            let touched = state.delete(id);
            tracing::debug!(entity = %id, existed, "Deleted entity");
            Ok((existed, touched))
        })
    }

    pub fn record_exists(&self, id: &EntityId) -> QuarryResult<bool> {
        Ok(self.state()?.contains(id))
    }

    /// ID an object would normalize to.
    pub fn identify(&self, data: &Value) -> QuarryResult<EntityId> {
        Ok(self.state()?.identify(data)?)
    }

    /// Reference to the entity of `typename` identified by `keys`.
    ///
    /// `keys` is an object holding the configured key fields, e.g.
    /// `{"id": "42"}`. The entity does not need to exist yet.
    pub fn get(&self, typename: &str, keys: &Value) -> QuarryResult<EntityRef> {
        let object = keys.as_object().ok_or_else(|| StoreError::ShapeMismatch {
            path: typename.to_string(),
            expected: "object of key fields".to_string(),
        })?;
        let id = self.state()?.require_keyed_id(typename, object)?;
        Ok(EntityRef {
            cache: self.clone(),
            id,
            typename: typename.to_string(),
        })
    }

    /// Clear every record, list and staleness mark.
    ///
    /// Observer registrations survive and are all refreshed.
    pub fn reset(&self) -> QuarryResult<()> {
        let deliveries = {
            let mut subs = self.subscriptions()?;
            let mut state = self.state_mut()?;
            state.reset();
            let ids = subs.ids();
            refresh(&mut subs, &mut state, &ids)
        };
        tracing::info!(observers = deliveries.len(), "Cache reset");
        self.deliver(deliveries);
        Ok(())
    }

    // ========================================================================
    // STALENESS
    // ========================================================================

    /// Mark a scope stale.
    ///
    /// Observers whose stale flag flips are refreshed.
    pub fn mark_stale(&self, scope: StaleScope) -> QuarryResult<()> {
        let deliveries = {
            let mut subs = self.subscriptions()?;
            let mut state = self.state_mut()?;
            tracing::debug!(scope = ?scope, "Marked stale");
            state.mark_stale(scope);
            let flipped: Vec<ObserverId> = subs
                .ids()
                .into_iter()
                .filter(|id| {
                    subs.get(*id).is_some_and(|sub| {
                        let fresh = state.read(&sub.target, &sub.selection, &sub.variables);
                        fresh.stale != sub.sender.borrow().stale
                    })
                })
                .collect();
            refresh(&mut subs, &mut state, &flipped)
        };
        self.deliver(deliveries);
        Ok(())
    }

    /// Whether `field` on `id` needs revalidation.
    pub fn is_stale(&self, id: &EntityId, field: &FieldKey) -> QuarryResult<bool> {
        let state = self.state()?;
        let typename = state.record(id).and_then(|r| r.typename.clone());
        Ok(state.stale.is_stale(id, typename.as_deref(), field))
    }

    // ========================================================================
    // LISTS
    // ========================================================================

    /// Handle over the list `name` under its default parent.
    pub fn list(&self, name: impl Into<String>) -> ListHandle {
        ListHandle::new(self.clone(), ListSelector::new(name))
    }

    /// Handle over every instance of `name`, whatever its parent.
    pub fn all_lists(&self, name: impl Into<String>) -> ListHandle {
        let mut selector = ListSelector::new(name);
        selector.parent = ParentScope::Any;
        ListHandle::new(self.clone(), selector)
    }

    pub(crate) fn list_instances(&self, selector: &ListSelector) -> QuarryResult<Vec<ListInstance>> {
        Ok(self.state()?.lists.select(selector))
    }

    pub(crate) fn list_members(&self, selector: &ListSelector) -> QuarryResult<Vec<EntityId>> {
        Ok(self.state()?.list_members(selector))
    }

    pub(crate) fn mutate_lists(
        &self,
        selector: &ListSelector,
        mutation: ListMutation,
        entity: &EntityId,
    ) -> QuarryResult<usize> {
        self.mutate(|state| Ok(state.mutate_lists(selector, mutation, entity)))
    }

    // ========================================================================
    // OBSERVERS
    // ========================================================================

    /// Register an observer of `selection` read from `target`.
    ///
    /// The observer holds a reference on every entity its reads touch until
    /// it is unsubscribed. `callback` runs on every refresh, in subscription
    /// order relative to other observers.
    pub fn subscribe(
        &self,
        target: ReadTarget,
        selection: Selection,
        variables: Variables,
        callback: Option<ChangeCallback>,
    ) -> QuarryResult<Observer> {
        let mut subs = self.subscriptions()?;
        let mut state = self.state_mut()?;
        let target = target.id();
        let outcome = state.read(&target, &selection, &variables);
        let entities = outcome.entities();
        for entity in &entities {
            state.gc.retain(entity);
        }
        let (sender, receiver) = watch::channel(outcome.snapshot());
        let id = subs.insert(Subscription {
            target,
            selection,
            variables,
            deps: outcome.deps,
            entities,
            sender: Arc::new(sender),
            callback,
        });
        tracing::trace!(observer = %id, "Observer subscribed");
        Ok(Observer::new(id, receiver))
    }

    /// Drop an observer and release its references.
    pub fn unsubscribe(&self, id: ObserverId) -> QuarryResult<bool> {
        let mut subs = self.subscriptions()?;
        let mut state = self.state_mut()?;
        let Some(sub) = subs.remove(id) else {
            return Ok(false);
        };
        for entity in &sub.entities {
            state.gc.release(entity);
        }
        tracing::trace!(observer = %id, "Observer unsubscribed");
        Ok(true)
    }

    /// Rebind an observer to new variables and refresh it.
    pub fn update_variables(&self, id: ObserverId, variables: Variables) -> QuarryResult<()> {
        let deliveries = {
            let mut subs = self.subscriptions()?;
            let mut state = self.state_mut()?;
            match subs.get_mut(id) {
                Some(sub) => sub.variables = variables,
                None => return Ok(()),
            }
            refresh(&mut subs, &mut state, &[id])
        };
        self.deliver(deliveries);
        Ok(())
    }

    pub fn observer_count(&self) -> QuarryResult<usize> {
        Ok(self.subscriptions()?.len())
    }

    /// Live observers holding a reference on `id`.
    pub fn refcount(&self, id: &EntityId) -> QuarryResult<usize> {
        Ok(self.state()?.gc.refcount(id))
    }

    // ========================================================================
    // GARBAGE COLLECTION
    // ========================================================================

    /// Evict every entity whose grace period has passed.
    pub fn collect_garbage(&self) -> QuarryResult<Vec<EntityId>> {
        let evicted = self.state_mut()?.collect_due(Instant::now());
        CacheMetrics::add(&self.inner.metrics.evictions, evicted.len());
        Ok(evicted)
    }

    /// Run `collect_garbage` on the configured interval until `shutdown`
    /// flips to true.
    pub fn spawn_collector(&self, mut shutdown: watch::Receiver<bool>) -> QuarryResult<JoinHandle<()>> {
        let period: Duration = self.state()?.config().collector_interval;
        let cache = self.clone();
        Ok(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_ms = period.as_millis() as u64, "Garbage collector started");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Garbage collector shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = cache.collect_garbage() {
                            tracing::warn!(error = %e, "Garbage collection failed");
                        }
                    }
                }
            }
        }))
    }

    pub fn stats(&self) -> QuarryResult<CacheStats> {
        let entries = self.state()?.record_count();
        Ok(self.inner.metrics.snapshot(entries))
    }

    // ========================================================================
    // NOTIFICATION
    // ========================================================================

    /// Run a store mutation, refresh the observers it affects and deliver.
    fn mutate<R, F>(&self, f: F) -> QuarryResult<R>
    where
        F: FnOnce(&mut StoreState) -> Result<(R, HashSet<FieldRef>), StoreError>,
    {
        let (result, deliveries) = {
            let mut subs = self.subscriptions()?;
            let mut state = self.state_mut()?;
            let (result, touched) = f(&mut *state)?;
            CacheMetrics::add(&self.inner.metrics.writes, touched.len());
            let affected = subs.affected(&touched);
            (result, refresh(&mut subs, &mut state, &affected))
        };
        self.deliver(deliveries);
        Ok(result)
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        CacheMetrics::add(&self.inner.metrics.notifications, deliveries.len());
        for delivery in deliveries {
            tracing::trace!(observer = %delivery.id, "Notifying observer");
            delivery.sender.send_replace(delivery.snapshot.clone());
            if let Some(callback) = delivery.callback {
                callback(&delivery.snapshot);
            }
        }
    }
}

/// Re-read each observer in `ids`, move its references to the entities the
/// new read touched and queue its snapshot.
fn refresh(
    subs: &mut SubscriptionRegistry,
    state: &mut StoreState,
    ids: &[ObserverId],
) -> Vec<Delivery> {
    let mut deliveries = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(sub) = subs.get_mut(*id) else {
            continue;
        };
        let outcome = state.read(&sub.target, &sub.selection, &sub.variables);
        let entities = outcome.entities();
        for entity in entities.difference(&sub.entities) {
            state.gc.retain(entity);
        }
        for entity in sub.entities.difference(&entities) {
            state.gc.release(entity);
        }
        sub.entities = entities;
        let snapshot = outcome.snapshot();
        sub.deps = outcome.deps;
        deliveries.push(Delivery {
            id: *id,
            sender: sub.sender.clone(),
            callback: sub.callback.clone(),
            snapshot,
        });
    }
    deliveries
}

/// Handle on one entity, whether or not it is stored yet.
#[derive(Debug, Clone)]
pub struct EntityRef {
    cache: Cache,
    id: EntityId,
    typename: String,
}

impl EntityRef {
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn read(&self, selection: &Selection, variables: &Variables) -> QuarryResult<ReadOutcome> {
        self.cache.read(&self.id, selection, variables)
    }

    /// Write fields of this entity.
    pub fn write(
        &self,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
    ) -> QuarryResult<HashSet<FieldRef>> {
        self.cache
            .write_typed(&self.id, Some(&self.typename), selection, data, variables)
    }

    pub fn delete(&self) -> QuarryResult<bool> {
        self.cache.delete(&self.id)
    }

    pub fn exists(&self) -> QuarryResult<bool> {
        self.cache.record_exists(&self.id)
    }

    /// Mark every field of this entity stale.
    pub fn mark_stale(&self) -> QuarryResult<()> {
        self.cache.mark_stale(StaleScope::Entity(self.id.clone()))
    }

    /// Mark one field stale. A key without arguments covers every argument
    /// variant of the field.
    pub fn mark_field_stale(&self, field: FieldKey) -> QuarryResult<()> {
        self.cache.mark_stale(StaleScope::field(self.id.clone(), field))
    }

    /// Observe `selection` on this entity.
    pub fn subscribe(
        &self,
        selection: Selection,
        variables: Variables,
        callback: Option<ChangeCallback>,
    ) -> QuarryResult<Observer> {
        self.cache
            .subscribe(ReadTarget::Entity(self.id.clone()), selection, variables, callback)
    }
}
