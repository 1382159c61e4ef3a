//! QUARRY Cache - Normalized Entity Store
//!
//! Response data is split into one record per entity and stored by
//! `(entity, field key)`. Lists, staleness marks, observer registrations and
//! reference counts all hang off the same store and share its lock; the
//! `Cache` handle is the only entry point.

pub mod cache;
pub mod gc;
pub mod lists;
pub mod stale;
pub mod stats;
pub mod store;
pub mod subscriptions;

pub use cache::{Cache, EntityRef, ReadTarget};
pub use gc::GarbageCollector;
pub use lists::{ListFilters, ListHandle, ListInstance, ListSelector, ParentScope};
pub use stale::{StaleScope, StaleTracker};
pub use stats::{CacheMetrics, CacheStats};
pub use store::{FieldRef, ReadOutcome, Record, Snapshot, ROOT_TYPENAME};
pub use subscriptions::{ChangeCallback, Observer, ObserverId};
