//! Identity types for normalized records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Fixed entity ID of the top-level query record.
pub const ROOT_ID: &str = "_ROOT_";

/// Stable identifier of one normalized record.
///
/// Keyed entities look like `User:42`; embedded objects (no key fields) are
/// addressed through their parent, e.g. `User:42.address`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// The synthetic root record.
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// Build an ID from a typename and the rendered key values.
    ///
    /// Separators inside key values are backslash-escaped, so distinct key
    /// tuples never render to the same ID.
    pub fn keyed<I, S>(typename: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut id = typename.to_string();
        for key in keys {
            id.push(':');
            for c in key.as_ref().chars() {
                if matches!(c, '\\' | ':' | '.') {
                    id.push('\\');
                }
                id.push(c);
            }
        }
        Self(id)
    }

    /// ID of an object embedded under `parent` at `field`.
    pub fn embedded(parent: &EntityId, field: &FieldKey, index: Option<usize>) -> Self {
        match index {
            Some(i) => Self(format!("{}.{}[{}]", parent.0, field.0, i)),
            None => Self(format!("{}.{}", parent.0, field.0)),
        }
    }

    /// Wrap an already-rendered ID.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage slot within a record: field name plus canonical arguments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey(String);

impl FieldKey {
    /// Key of a field fetched without arguments.
    pub fn plain(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Key of a field fetched with resolved argument values.
    ///
    /// Arguments are ordered by name and values rendered as canonical JSON,
    /// so `f(b: 1, a: 2)` and `f(a: 2, b: 1)` share a slot.
    pub fn with_args(name: &str, args: &BTreeMap<String, Value>) -> Self {
        if args.is_empty() {
            return Self::plain(name);
        }
        let rendered: Vec<String> = args
            .iter()
            .map(|(k, v)| format!("{}: {}", k, canonical_json(v)))
            .collect();
        Self(format!("{}({})", name, rendered.join(", ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The field name without the argument suffix.
    pub fn field_name(&self) -> &str {
        match self.0.find('(') {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let parts: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}: {}", Value::String(k.clone()), canonical_json(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(", "))
        }
        other => other.to_string(),
    }
}

/// Render a key value the way it appears inside an entity ID.
pub fn render_key_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(canonical_json(other)),
    }
}

// =============================================================================
// TESTS
// =============================================================================
