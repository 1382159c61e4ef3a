//! Named, filter-scoped collections of entity references.
//!
//! A list instance is registered whenever a field carrying a list directive
//! is written. Its members live in the parent record's `LinkList` slot, so
//! every list mutation is an ordinary field write and goes through the same
//! staleness and notification path as network data.

use quarry_core::{EntityId, FieldKey, ListPosition, QuarryResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::cache::Cache;

/// Resolved arguments a list field was fetched with.
pub type ListFilters = BTreeMap<String, Value>;

/// One registered list: a name bound to a parent record's field slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ListInstance {
    pub name: String,
    pub parent: EntityId,
    pub field: FieldKey,
    pub filters: ListFilters,
}

/// Registry of every list instance seen in written data.
#[derive(Debug, Default)]
pub struct ListRegistry {
    instances: Vec<ListInstance>,
}

impl ListRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance; the same name, parent and slot register once.
    pub fn register(&mut self, instance: ListInstance) {
        let exists = self.instances.iter().any(|i| {
            i.name == instance.name && i.parent == instance.parent && i.field == instance.field
        });
        if !exists {
            tracing::debug!(
                list = %instance.name,
                parent = %instance.parent,
                field = %instance.field,
                "Registered list instance"
            );
            self.instances.push(instance);
        }
    }

    pub fn instances(&self) -> impl Iterator<Item = &ListInstance> {
        self.instances.iter()
    }

    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ListInstance> {
        self.instances.iter().filter(move |i| i.name == name)
    }

    /// Drop instances whose parent record is gone.
    pub fn forget_parent(&mut self, parent: &EntityId) {
        self.instances.retain(|i| &i.parent != parent);
    }

    pub fn clear(&mut self) {
        self.instances.clear();
    }

    /// Instances a selector resolves to, in registration order.
    pub fn select(&self, selector: &ListSelector) -> Vec<ListInstance> {
        let named: Vec<&ListInstance> = self.named(&selector.name).collect();
        let parent = match &selector.parent {
            ParentScope::Any => None,
            ParentScope::Entity(id) => Some(id.clone()),
            ParentScope::Default => {
                // A list living under exactly one parent needs no explicit scope.
                let first = named.first().map(|i| i.parent.clone());
                match first {
                    Some(p) if named.iter().all(|i| i.parent == p) => Some(p),
                    _ => Some(EntityId::root()),
                }
            }
        };
        named
            .into_iter()
            .filter(|i| parent.as_ref().map_or(true, |p| &i.parent == p))
            .filter(|i| selector.filters.as_ref().map_or(true, |f| &i.filters == f))
            .filter(|i| selector.when.iter().all(|pred| pred(&i.filters)))
            .cloned()
            .collect()
    }
}

/// Which parent records a selector considers.
#[derive(Debug, Clone, PartialEq)]
pub enum ParentScope {
    /// The only parent the list has, else the root record.
    Default,
    Entity(EntityId),
    /// Every parent (broadcast).
    Any,
}

type FilterPredicate = Arc<dyn Fn(&ListFilters) -> bool + Send + Sync>;

/// Criteria picking list instances by name, parent and filters.
#[derive(Clone)]
pub struct ListSelector {
    pub name: String,
    pub parent: ParentScope,
    pub filters: Option<ListFilters>,
    when: Vec<FilterPredicate>,
}

impl ListSelector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: ParentScope::Default,
            filters: None,
            when: Vec::new(),
        }
    }
}

impl fmt::Debug for ListSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListSelector")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("filters", &self.filters)
            .field("when", &self.when.len())
            .finish()
    }
}

/// Handle over the list instances matching a selector.
///
/// Mutations apply to every matching instance and return how many were
/// touched; a handle matching nothing is a no-op.
#[derive(Clone, Debug)]
pub struct ListHandle {
    cache: Cache,
    selector: ListSelector,
}

impl ListHandle {
    pub(crate) fn new(cache: Cache, selector: ListSelector) -> Self {
        Self { cache, selector }
    }

    /// Scope to lists living under `parent`.
    pub fn parent(mut self, parent: EntityId) -> Self {
        self.selector.parent = ParentScope::Entity(parent);
        self
    }

    /// Scope to the instance fetched with exactly these filters.
    pub fn filters(mut self, filters: ListFilters) -> Self {
        self.selector.filters = Some(filters);
        self
    }

    /// Scope to instances whose filters satisfy `predicate`.
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ListFilters) -> bool + Send + Sync + 'static,
    {
        self.selector.when.push(Arc::new(predicate));
        self
    }

    /// Scope to instances whose filters contain every given pair.
    pub fn when_matches(self, expected: ListFilters) -> Self {
        self.when(move |filters| expected.iter().all(|(k, v)| filters.get(k) == Some(v)))
    }

    pub fn selector(&self) -> &ListSelector {
        &self.selector
    }

    /// Matching instances at this moment.
    pub fn instances(&self) -> QuarryResult<Vec<ListInstance>> {
        self.cache.list_instances(&self.selector)
    }

    pub fn append(&self, entity: &EntityId) -> QuarryResult<usize> {
        self.insert(ListPosition::Last, entity)
    }

    pub fn prepend(&self, entity: &EntityId) -> QuarryResult<usize> {
        self.insert(ListPosition::First, entity)
    }

    /// Insert at the cache's configured default position.
    pub fn add(&self, entity: &EntityId) -> QuarryResult<usize> {
        let position = self.cache.config()?.default_list_position;
        self.insert(position, entity)
    }

    pub fn insert(&self, position: ListPosition, entity: &EntityId) -> QuarryResult<usize> {
        self.cache
            .mutate_lists(&self.selector, ListMutation::Insert(position), entity)
    }

    pub fn remove(&self, entity: &EntityId) -> QuarryResult<usize> {
        self.cache.mutate_lists(&self.selector, ListMutation::Remove, entity)
    }

    /// Remove `entity` if present, else insert it at `position`.
    pub fn toggle(&self, position: ListPosition, entity: &EntityId) -> QuarryResult<usize> {
        self.cache
            .mutate_lists(&self.selector, ListMutation::Toggle(position), entity)
    }

    /// Members of the first matching instance.
    pub fn ids(&self) -> QuarryResult<Vec<EntityId>> {
        self.cache.list_members(&self.selector)
    }

    pub fn len(&self) -> QuarryResult<usize> {
        Ok(self.ids()?.len())
    }

    pub fn is_empty(&self) -> QuarryResult<bool> {
        Ok(self.ids()?.is_empty())
    }
}

/// A list change applied atomically under the store lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListMutation {
    Insert(ListPosition),
    Remove,
    Toggle(ListPosition),
}
