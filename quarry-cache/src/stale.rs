//! Staleness tracking for cached fields.
//!
//! Marks and field writes share one monotonically increasing sequence, the
//! same watermark idea a change journal uses. A field is stale when any mark
//! covering it was set after the field was last written. Coarse marks are
//! never erased by fine writes: each later write supersedes the mark for the
//! one field it touched, and re-marking a scope re-arms it.

use quarry_core::{EntityId, FieldKey};
use std::collections::HashMap;

/// Scope of an invalidation mark.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StaleScope {
    /// Everything in the store.
    Global,
    /// Every field of every entity of a type.
    Type(String),
    /// One field across every entity of a type.
    ///
    /// A field key without arguments matches every argument variant.
    TypeField { typename: String, field: FieldKey },
    /// Every field of one entity.
    Entity(EntityId),
    /// One field of one entity. Same argument matching as `TypeField`.
    Field { entity: EntityId, field: FieldKey },
}

impl StaleScope {
    pub fn type_field(typename: impl Into<String>, field: FieldKey) -> Self {
        Self::TypeField {
            typename: typename.into(),
            field,
        }
    }

    pub fn field(entity: EntityId, field: FieldKey) -> Self {
        Self::Field { entity, field }
    }
}

/// Per-field write sequences and per-scope marks.
#[derive(Debug, Default)]
pub struct StaleTracker {
    sequence: u64,
    written: HashMap<(EntityId, FieldKey), u64>,
    global: Option<u64>,
    types: HashMap<String, u64>,
    type_fields: HashMap<(String, FieldKey), u64>,
    entities: HashMap<EntityId, u64>,
    fields: HashMap<(EntityId, FieldKey), u64>,
}

impl StaleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Current watermark.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Record a fresh write of one field.
    pub fn record_write(&mut self, entity: &EntityId, field: &FieldKey) {
        let seq = self.next();
        self.written.insert((entity.clone(), field.clone()), seq);
    }

    /// Set a mark on `scope`.
    pub fn mark(&mut self, scope: StaleScope) {
        let seq = self.next();
        match scope {
            StaleScope::Global => self.global = Some(seq),
            StaleScope::Type(typename) => {
                self.types.insert(typename, seq);
            }
            StaleScope::TypeField { typename, field } => {
                self.type_fields.insert((typename, field), seq);
            }
            StaleScope::Entity(entity) => {
                self.entities.insert(entity, seq);
            }
            StaleScope::Field { entity, field } => {
                self.fields.insert((entity, field), seq);
            }
        }
    }

    /// Whether the stored value of `field` on `entity` needs revalidation.
    ///
    /// The most specific mark is checked first, then coarser scopes.
    pub fn is_stale(&self, entity: &EntityId, typename: Option<&str>, field: &FieldKey) -> bool {
        let written = self
            .written
            .get(&(entity.clone(), field.clone()))
            .copied()
            .unwrap_or(0);
        let after_write = |mark: u64| mark > written;

        if let Some(&mark) = self.fields.get(&(entity.clone(), field.clone())) {
            if after_write(mark) {
                return true;
            }
        }
        let bare = FieldKey::plain(field.field_name());
        if bare != *field {
            if let Some(&mark) = self.fields.get(&(entity.clone(), bare.clone())) {
                if after_write(mark) {
                    return true;
                }
            }
        }
        if let Some(&mark) = self.entities.get(entity) {
            if after_write(mark) {
                return true;
            }
        }
        if let Some(typename) = typename {
            for key in [field, &bare] {
                if let Some(&mark) = self.type_fields.get(&(typename.to_string(), key.clone())) {
                    if after_write(mark) {
                        return true;
                    }
                }
            }
            if let Some(&mark) = self.types.get(typename) {
                if after_write(mark) {
                    return true;
                }
            }
        }
        self.global.map(after_write).unwrap_or(false)
    }

    /// Drop every trace of an entity that left the store.
    pub fn forget(&mut self, entity: &EntityId) {
        self.written.retain(|(id, _), _| id != entity);
        self.fields.retain(|(id, _), _| id != entity);
        self.entities.remove(entity);
    }

    pub fn clear(&mut self) {
        let sequence = self.sequence;
        *self = Self::default();
        self.sequence = sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn user(id: &str) -> EntityId {
        EntityId::keyed("User", [id])
    }

    fn name() -> FieldKey {
        FieldKey::plain("name")
    }

    #[test]
    fn test_fresh_write_is_not_stale() {
        let mut tracker = StaleTracker::new();
        tracker.record_write(&user("1"), &name());
        assert!(!tracker.is_stale(&user("1"), Some("User"), &name()));
    }

    #[test]
    fn test_type_mark_covers_members_until_rewritten() {
        let mut tracker = StaleTracker::new();
        tracker.record_write(&user("1"), &name());
        tracker.record_write(&user("2"), &name());
        tracker.mark(StaleScope::Type("User".to_string()));

        assert!(tracker.is_stale(&user("1"), Some("User"), &name()));
        assert!(tracker.is_stale(&user("2"), Some("User"), &name()));

        tracker.record_write(&user("1"), &name());
        assert!(!tracker.is_stale(&user("1"), Some("User"), &name()));
        // The type mark is still in force for fields written before it
        assert!(tracker.is_stale(&user("2"), Some("User"), &name()));
    }

    #[test]
    fn test_type_mark_does_not_cover_other_types() {
        let mut tracker = StaleTracker::new();
        let post = EntityId::keyed("Post", ["9"]);
        tracker.record_write(&post, &name());
        tracker.mark(StaleScope::Type("User".to_string()));
        assert!(!tracker.is_stale(&post, Some("Post"), &name()));
    }

    #[test]
    fn test_remarking_rearms_scope() {
        let mut tracker = StaleTracker::new();
        tracker.record_write(&user("1"), &name());
        tracker.mark(StaleScope::Global);
        tracker.record_write(&user("1"), &name());
        assert!(!tracker.is_stale(&user("1"), Some("User"), &name()));
        tracker.mark(StaleScope::Global);
        assert!(tracker.is_stale(&user("1"), Some("User"), &name()));
    }

    #[test]
    fn test_bare_field_mark_matches_argument_variants() {
        let mut tracker = StaleTracker::new();
        let mut args = BTreeMap::new();
        args.insert("size".to_string(), json!(64));
        let avatar_64 = FieldKey::with_args("avatar", &args);
        tracker.record_write(&user("1"), &avatar_64);
        tracker.record_write(&user("1"), &name());

        tracker.mark(StaleScope::type_field("User", FieldKey::plain("avatar")));
        assert!(tracker.is_stale(&user("1"), Some("User"), &avatar_64));
        assert!(!tracker.is_stale(&user("1"), Some("User"), &name()));
    }

    #[test]
    fn test_entity_and_field_marks() {
        let mut tracker = StaleTracker::new();
        let email = FieldKey::plain("email");
        tracker.record_write(&user("1"), &name());
        tracker.record_write(&user("1"), &email);
        tracker.record_write(&user("2"), &name());

        tracker.mark(StaleScope::field(user("1"), email.clone()));
        assert!(tracker.is_stale(&user("1"), Some("User"), &email));
        assert!(!tracker.is_stale(&user("1"), Some("User"), &name()));

        tracker.mark(StaleScope::Entity(user("1")));
        assert!(tracker.is_stale(&user("1"), Some("User"), &name()));
        assert!(!tracker.is_stale(&user("2"), Some("User"), &name()));
    }

    #[test]
    fn test_forget_drops_entity_marks() {
        let mut tracker = StaleTracker::new();
        tracker.mark(StaleScope::Entity(user("1")));
        tracker.forget(&user("1"));
        tracker.record_write(&user("1"), &name());
        assert!(!tracker.is_stale(&user("1"), Some("User"), &name()));
    }
}
