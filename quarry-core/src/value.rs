//! Values stored in normalized records

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::EntityId;

/// Content of one field slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    /// Leaf value, `null` included.
    Scalar(Value),
    /// Reference to a single record.
    Link(EntityId),
    /// Ordered references; `None` entries are null items.
    LinkList(Vec<Option<EntityId>>),
}

impl StoredValue {
    /// Every record this value references.
    pub fn linked_ids(&self) -> Vec<&EntityId> {
        match self {
            Self::Scalar(_) => Vec::new(),
            Self::Link(id) => vec![id],
            Self::LinkList(ids) => ids.iter().flatten().collect(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Value::Null))
    }
}

/// End of a list that an insert targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListPosition {
    First,
    #[default]
    Last,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_linked_ids_skips_nulls() {
        let a = EntityId::keyed("User", ["a"]);
        let b = EntityId::keyed("User", ["b"]);
        let value = StoredValue::LinkList(vec![Some(a.clone()), None, Some(b.clone())]);
        assert_eq!(value.linked_ids(), vec![&a, &b]);
        assert!(StoredValue::Scalar(json!(1)).linked_ids().is_empty());
    }

    #[test]
    fn test_is_null() {
        assert!(StoredValue::Scalar(Value::Null).is_null());
        assert!(!StoredValue::Scalar(json!(false)).is_null());
    }
}
