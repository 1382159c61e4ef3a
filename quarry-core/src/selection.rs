//! Selection sets consumed from compiled documents.
//!
//! A selection is the compiled shape of a query, mutation or fragment: an
//! ordered list of fields, each optionally carrying arguments, a nested
//! selection, a list directive and an inline-fragment type condition.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ids::FieldKey;

/// Variable bindings for one operation instance.
pub type Variables = serde_json::Map<String, Value>;

/// Field argument as written in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Argument {
    /// Inline literal value.
    Literal(Value),
    /// Reference to an operation variable.
    Variable(String),
}

impl Argument {
    /// Resolve against the bound variables. Unbound variables resolve to
    /// `None` and the argument is omitted.
    pub fn resolve(&self, variables: &Variables) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Variable(name) => variables.get(name).cloned(),
        }
    }
}

/// Marks a field whose links form a named list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDirective {
    pub name: String,
}

/// One selected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub alias: Option<String>,
    #[serde(default)]
    pub arguments: BTreeMap<String, Argument>,
    pub selection: Option<Selection>,
    pub list: Option<ListDirective>,
    /// Only applies to objects whose `__typename` matches.
    pub type_condition: Option<String>,
}

impl Field {
    /// A leaf field.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: BTreeMap::new(),
            selection: None,
            list: None,
            type_condition: None,
        }
    }

    /// A field with a nested selection.
    pub fn object(name: impl Into<String>, selection: Selection) -> Self {
        Self {
            selection: Some(selection),
            ..Self::scalar(name)
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, argument: Argument) -> Self {
        self.arguments.insert(name.into(), argument);
        self
    }

    pub fn list(mut self, name: impl Into<String>) -> Self {
        self.list = Some(ListDirective { name: name.into() });
        self
    }

    pub fn on(mut self, typename: impl Into<String>) -> Self {
        self.type_condition = Some(typename.into());
        self
    }

    /// Key under which the field appears in response data.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Argument values after variable substitution.
    pub fn resolve_arguments(&self, variables: &Variables) -> BTreeMap<String, Value> {
        self.arguments
            .iter()
            .filter_map(|(name, arg)| arg.resolve(variables).map(|v| (name.clone(), v)))
            .collect()
    }

    /// Storage slot for this field under the given variables.
    pub fn field_key(&self, variables: &Variables) -> FieldKey {
        FieldKey::with_args(&self.name, &self.resolve_arguments(variables))
    }

    /// Whether the field applies to an object of `typename`.
    pub fn applies_to(&self, typename: Option<&str>) -> bool {
        match (&self.type_condition, typename) {
            (None, _) => true,
            (Some(cond), Some(actual)) => cond == actual,
            (Some(_), None) => false,
        }
    }
}

/// Ordered set of selected fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub fields: Vec<Field>,
}

impl Selection {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Fields that apply to an object of `typename`.
    pub fn fields_for<'a>(&'a self, typename: Option<&'a str>) -> impl Iterator<Item = &'a Field> {
        self.fields.iter().filter(move |f| f.applies_to(typename))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
