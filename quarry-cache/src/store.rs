//! Normalized record storage.
//!
//! `StoreState` owns every record together with the list registry, the
//! staleness tracker and the reference counts, so one lock covers all of
//! them. Writes walk a selection over response data, split nested objects
//! into their own records and return the exact `(entity, field)` slots they
//! touched. Reads walk the same selection back over the records and report
//! the slots they visited, which observers use as their dependency set.

use quarry_core::{
    render_key_value, CacheConfig, EntityId, FieldKey, ListPosition, ListRemoveMode, Selection,
    StoreError, StoredValue, Variables, TYPENAME_FIELD,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

use crate::gc::GarbageCollector;
use crate::lists::{ListInstance, ListMutation, ListRegistry, ListSelector};
use crate::stale::{StaleScope, StaleTracker};

/// Typename recorded on the root record.
pub const ROOT_TYPENAME: &str = "Query";

/// One `(entity, field)` slot.
pub type FieldRef = (EntityId, FieldKey);

/// Stored fields of one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub typename: Option<String>,
    pub fields: BTreeMap<FieldKey, StoredValue>,
}

/// Data produced by walking a selection over the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadOutcome {
    /// Collected object, or `null` when the target record is absent.
    pub data: Value,
    /// A selected field had no stored value.
    pub partial: bool,
    /// A visited field is marked stale.
    pub stale: bool,
    /// Every slot the read visited, present or not.
    pub deps: HashSet<FieldRef>,
}

impl ReadOutcome {
    /// Entities the read depended on.
    pub fn entities(&self) -> HashSet<EntityId> {
        self.deps.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Whether the read found anything at all.
    pub fn has_data(&self) -> bool {
        match &self.data {
            Value::Object(map) => map.values().any(|v| !v.is_null()),
            Value::Null => false,
            _ => true,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            data: self.data.clone(),
            partial: self.partial,
            stale: self.stale,
        }
    }
}

/// Value an observer exposes to its consumers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub data: Value,
    pub partial: bool,
    pub stale: bool,
}

#[derive(Debug)]
pub struct StoreState {
    config: CacheConfig,
    records: BTreeMap<EntityId, Record>,
    pub(crate) lists: ListRegistry,
    pub(crate) stale: StaleTracker,
    pub(crate) gc: GarbageCollector,
}

impl StoreState {
    pub fn new(config: CacheConfig) -> Self {
        let gc = GarbageCollector::new(config.gc_grace_period);
        let mut records = BTreeMap::new();
        records.insert(EntityId::root(), root_record());
        Self {
            config,
            records,
            lists: ListRegistry::new(),
            stale: StaleTracker::new(),
            gc,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn record(&self, id: &EntityId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.records.contains_key(id)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    // ========================================================================
    // IDENTITY
    // ========================================================================

    /// ID for an object of `typename` carrying its key fields, if complete.
    pub fn keyed_id(&self, typename: &str, object: &Map<String, Value>) -> Option<EntityId> {
        let keys = self.config.keys_for(typename);
        let mut rendered = Vec::with_capacity(keys.len());
        for key in keys {
            rendered.push(render_key_value(object.get(key)?)?);
        }
        Some(EntityId::keyed(typename, rendered))
    }

    /// ID for a keyed object, reporting what is missing.
    pub fn identify(&self, data: &Value) -> Result<EntityId, StoreError> {
        let object = data.as_object().ok_or_else(|| StoreError::ShapeMismatch {
            path: String::new(),
            expected: "object".to_string(),
        })?;
        let typename = object
            .get(TYPENAME_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::MissingTypename {
                path: String::new(),
            })?;
        self.require_keyed_id(typename, object)
    }

    pub fn require_keyed_id(
        &self,
        typename: &str,
        object: &Map<String, Value>,
    ) -> Result<EntityId, StoreError> {
        for key in self.config.keys_for(typename) {
            if object.get(key).and_then(render_key_value).is_none() {
                return Err(StoreError::MissingKeyField {
                    typename: typename.to_string(),
                    field: key.clone(),
                    path: String::new(),
                });
            }
        }
        self.keyed_id(typename, object)
            .ok_or_else(|| StoreError::ShapeMismatch {
                path: String::new(),
                expected: format!("{} key values", typename),
            })
    }

    fn child_id(
        &self,
        object: &Map<String, Value>,
        parent: &EntityId,
        field: &FieldKey,
        index: Option<usize>,
    ) -> EntityId {
        object
            .get(TYPENAME_FIELD)
            .and_then(Value::as_str)
            .and_then(|typename| self.keyed_id(typename, object))
            .unwrap_or_else(|| EntityId::embedded(parent, field, index))
    }

    // ========================================================================
    // WRITE
    // ========================================================================

    /// Normalize `data` under `target` following `selection`.
    pub fn write(
        &mut self,
        target: &EntityId,
        typename: Option<&str>,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
    ) -> Result<HashSet<FieldRef>, StoreError> {
        let object = data.as_object().ok_or_else(|| StoreError::ShapeMismatch {
            path: target.to_string(),
            expected: "object".to_string(),
        })?;
        let mut touched = HashSet::new();
        self.write_object(
            target,
            typename,
            selection,
            object,
            variables,
            target.as_str(),
            &mut touched,
        )?;
        Ok(touched)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_object(
        &mut self,
        id: &EntityId,
        typename_hint: Option<&str>,
        selection: &Selection,
        object: &Map<String, Value>,
        variables: &Variables,
        path: &str,
        touched: &mut HashSet<FieldRef>,
    ) -> Result<(), StoreError> {
        let typename = object
            .get(TYPENAME_FIELD)
            .and_then(Value::as_str)
            .or(typename_hint)
            .map(str::to_string)
            .or_else(|| self.records.get(id).and_then(|r| r.typename.clone()));

        let record = self.records.entry(id.clone()).or_default();
        if typename.is_some() {
            record.typename = typename.clone();
        }

        for field in selection.fields_for(typename.as_deref()) {
            if field.name == TYPENAME_FIELD {
                continue;
            }
            let Some(value) = object.get(field.response_key()) else {
                continue;
            };
            let key = field.field_key(variables);
            let field_path = format!("{}.{}", path, field.response_key());

            let stored = match (&field.selection, value) {
                (None, v) => StoredValue::Scalar(v.clone()),
                (Some(_), Value::Null) => StoredValue::Scalar(Value::Null),
                (Some(sub), Value::Object(child)) => {
                    let child_id = self.child_id(child, id, &key, None);
                    self.write_object(&child_id, None, sub, child, variables, &field_path, touched)?;
                    StoredValue::Link(child_id)
                }
                (Some(sub), Value::Array(items)) => {
                    let mut ids = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        match item {
                            Value::Null => ids.push(None),
                            Value::Object(child) => {
                                let child_id = self.child_id(child, id, &key, Some(index));
                                let item_path = format!("{}[{}]", field_path, index);
                                self.write_object(
                                    &child_id, None, sub, child, variables, &item_path, touched,
                                )?;
                                ids.push(Some(child_id));
                            }
                            _ => {
                                return Err(StoreError::ShapeMismatch {
                                    path: format!("{}[{}]", field_path, index),
                                    expected: "object or null".to_string(),
                                })
                            }
                        }
                    }
                    StoredValue::LinkList(ids)
                }
                (Some(_), _) => {
                    return Err(StoreError::ShapeMismatch {
                        path: field_path,
                        expected: "object, list or null".to_string(),
                    })
                }
            };

            if let Some(list) = &field.list {
                self.lists.register(ListInstance {
                    name: list.name.clone(),
                    parent: id.clone(),
                    field: key.clone(),
                    filters: field.resolve_arguments(variables),
                });
            }

            self.set_field(id, key, stored, touched);
        }
        Ok(())
    }

    /// The single mutation primitive: store one slot and clear its staleness.
    fn set_field(
        &mut self,
        id: &EntityId,
        key: FieldKey,
        value: StoredValue,
        touched: &mut HashSet<FieldRef>,
    ) {
        self.stale.record_write(id, &key);
        self.records
            .entry(id.clone())
            .or_default()
            .fields
            .insert(key.clone(), value);
        touched.insert((id.clone(), key));
    }

    // ========================================================================
    // READ
    // ========================================================================

    /// Walk `selection` from `target` without mutating anything.
    pub fn read(&self, target: &EntityId, selection: &Selection, variables: &Variables) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        let data = self.read_object(target, selection, variables, &mut outcome);
        outcome.data = data;
        outcome
    }

    fn read_object(
        &self,
        id: &EntityId,
        selection: &Selection,
        variables: &Variables,
        outcome: &mut ReadOutcome,
    ) -> Value {
        let record = self.records.get(id);
        let typename = record.and_then(|r| r.typename.as_deref());
        let mut data = Map::new();

        for field in selection.fields_for(typename) {
            if field.name == TYPENAME_FIELD {
                let value = typename.map(|t| Value::String(t.to_string()));
                data.insert(field.response_key().to_string(), value.unwrap_or(Value::Null));
                continue;
            }
            let key = field.field_key(variables);
            outcome.deps.insert((id.clone(), key.clone()));
            if self.stale.is_stale(id, typename, &key) {
                outcome.stale = true;
            }

            let stored = record.and_then(|r| r.fields.get(&key));
            let value = match (stored, &field.selection) {
                (None, _) => {
                    outcome.partial = true;
                    Value::Null
                }
                (Some(StoredValue::Scalar(v)), _) => v.clone(),
                (Some(StoredValue::Link(child)), Some(sub)) => {
                    self.read_object(child, sub, variables, outcome)
                }
                (Some(StoredValue::LinkList(children)), Some(sub)) => Value::Array(
                    children
                        .iter()
                        .map(|child| match child {
                            Some(child) => self.read_object(child, sub, variables, outcome),
                            None => Value::Null,
                        })
                        .collect(),
                ),
                // Links selected as leaves expose the referenced IDs.
                (Some(StoredValue::Link(child)), None) => Value::String(child.to_string()),
                (Some(StoredValue::LinkList(children)), None) => Value::Array(
                    children
                        .iter()
                        .map(|c| c.as_ref().map_or(Value::Null, |c| Value::String(c.to_string())))
                        .collect(),
                ),
            };
            data.insert(field.response_key().to_string(), value);
        }

        if record.is_none() {
            outcome.partial = true;
            return Value::Null;
        }
        Value::Object(data)
    }

    // ========================================================================
    // DELETE / EVICT
    // ========================================================================

    /// Remove a record and strip it from every list.
    pub fn delete(&mut self, id: &EntityId) -> HashSet<FieldRef> {
        let mut touched = HashSet::new();
        let instances: Vec<ListInstance> = self.lists.instances().cloned().collect();
        for instance in &instances {
            let members = self.members(instance);
            if members.iter().any(|m| m.as_ref() == Some(id)) {
                let kept: Vec<Option<EntityId>> =
                    members.into_iter().filter(|m| m.as_ref() != Some(id)).collect();
                self.set_field(
                    &instance.parent,
                    instance.field.clone(),
                    StoredValue::LinkList(kept),
                    &mut touched,
                );
            }
        }
        touched.extend(self.remove_record(id));
        touched
    }

    /// Drop a record's storage; returns the slots it held.
    fn remove_record(&mut self, id: &EntityId) -> HashSet<FieldRef> {
        let Some(record) = self.records.remove(id) else {
            return HashSet::new();
        };
        self.lists.forget_parent(id);
        self.stale.forget(id);
        self.gc.forget(id);
        if id.is_root() {
            self.records.insert(EntityId::root(), root_record());
        }
        record
            .fields
            .into_keys()
            .map(|key| (id.clone(), key))
            .collect()
    }

    /// Whether any list holds `id`.
    pub fn is_list_member(&self, id: &EntityId) -> bool {
        self.lists
            .instances()
            .any(|instance| self.members(instance).iter().any(|m| m.as_ref() == Some(id)))
    }

    /// Evict due entities that are still unreferenced and not in a list.
    pub fn collect_due(&mut self, now: tokio::time::Instant) -> Vec<EntityId> {
        let mut evicted = Vec::new();
        for id in self.gc.take_due(now) {
            if self.gc.refcount(&id) > 0 || self.is_list_member(&id) {
                continue;
            }
            if self.records.contains_key(&id) {
                self.remove_record(&id);
                tracing::debug!(entity = %id, "Evicted unreferenced entity");
                evicted.push(id);
            }
        }
        evicted
    }

    /// Clear everything but an empty root; returns every slot that existed.
    pub fn reset(&mut self) -> HashSet<FieldRef> {
        let touched: HashSet<FieldRef> = self
            .records
            .iter()
            .flat_map(|(id, record)| record.fields.keys().map(move |k| (id.clone(), k.clone())))
            .collect();
        self.records.clear();
        self.records.insert(EntityId::root(), root_record());
        self.lists.clear();
        self.stale.clear();
        self.gc.clear_pending();
        touched
    }

    pub fn mark_stale(&mut self, scope: StaleScope) {
        self.stale.mark(scope);
    }

    // ========================================================================
    // LISTS
    // ========================================================================

    fn members(&self, instance: &ListInstance) -> Vec<Option<EntityId>> {
        match self
            .records
            .get(&instance.parent)
            .and_then(|r| r.fields.get(&instance.field))
        {
            Some(StoredValue::LinkList(ids)) => ids.clone(),
            _ => Vec::new(),
        }
    }

    pub fn list_members(&self, selector: &ListSelector) -> Vec<EntityId> {
        self.lists
            .select(selector)
            .first()
            .map(|instance| self.members(instance).into_iter().flatten().collect())
            .unwrap_or_default()
    }

    /// Apply one list mutation to every matching instance.
    pub(crate) fn mutate_lists(
        &mut self,
        selector: &ListSelector,
        mutation: ListMutation,
        entity: &EntityId,
    ) -> (usize, HashSet<FieldRef>) {
        let mut touched = HashSet::new();
        let instances = self.lists.select(selector);
        for instance in &instances {
            let mut members = self.members(instance);
            let present = members.iter().any(|m| m.as_ref() == Some(entity));
            match mutation {
                ListMutation::Insert(position) => insert_at(&mut members, position, entity),
                ListMutation::Remove => remove_from(&mut members, entity, self.config.list_remove_mode),
                ListMutation::Toggle(_) if present => {
                    remove_from(&mut members, entity, self.config.list_remove_mode)
                }
                ListMutation::Toggle(position) => insert_at(&mut members, position, entity),
            }
            tracing::debug!(
                list = %instance.name,
                parent = %instance.parent,
                entity = %entity,
                mutation = ?mutation,
                "Applied list mutation"
            );
            self.set_field(
                &instance.parent,
                instance.field.clone(),
                StoredValue::LinkList(members),
                &mut touched,
            );
        }
        if instances.is_empty() {
            tracing::debug!(list = %selector.name, "List mutation matched no registered list");
        }
        (instances.len(), touched)
    }
}

fn root_record() -> Record {
    Record {
        typename: Some(ROOT_TYPENAME.to_string()),
        fields: BTreeMap::new(),
    }
}

fn insert_at(members: &mut Vec<Option<EntityId>>, position: ListPosition, entity: &EntityId) {
    match position {
        ListPosition::First => members.insert(0, Some(entity.clone())),
        ListPosition::Last => members.push(Some(entity.clone())),
    }
}

fn remove_from(members: &mut Vec<Option<EntityId>>, entity: &EntityId, mode: ListRemoveMode) {
    match mode {
        ListRemoveMode::All => members.retain(|m| m.as_ref() != Some(entity)),
        ListRemoveMode::First => {
            if let Some(idx) = members.iter().position(|m| m.as_ref() == Some(entity)) {
                members.remove(idx);
            }
        }
    }
}
