//! Compiled document artifacts and cache policies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::selection::{Selection, Variables};

/// Kind of operation a document declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Query,
    Mutation,
    Fragment,
    Subscription,
}

/// Rule governing whether a read is served from the store, the network, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Read the store only; never touch the network.
    CacheOnly,
    /// Always go to the network.
    NetworkOnly,
    /// Serve the store immediately and also refresh from the network.
    CacheAndNetwork,
    /// Serve the store when complete and fresh, otherwise go to the network.
    #[default]
    CacheOrNetwork,
}

impl CachePolicy {
    /// Whether the policy may serve data from the store.
    pub fn reads_cache(&self) -> bool {
        !matches!(self, Self::NetworkOnly)
    }
}

/// Declared operation variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    pub default: Option<Value>,
}

/// Compiled shape of a query, mutation or fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentArtifact {
    pub name: String,
    pub kind: OperationKind,
    /// Document text sent to the server.
    pub raw: String,
    /// SHA-256 hex digest of `raw`, usable as a persisted-query id.
    pub hash: String,
    pub selection: Selection,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
    pub default_policy: Option<CachePolicy>,
}

impl DocumentArtifact {
    pub fn new(
        name: impl Into<String>,
        kind: OperationKind,
        raw: impl Into<String>,
        selection: Selection,
    ) -> Self {
        let raw = raw.into();
        let hash = document_hash(&raw);
        Self {
            name: name.into(),
            kind,
            raw,
            hash,
            selection,
            variables: Vec::new(),
            default_policy: None,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, default: Option<Value>) -> Self {
        self.variables.push(VariableDefinition {
            name: name.into(),
            default,
        });
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    /// Declared defaults overlaid with caller-supplied values.
    pub fn resolve_variables(&self, input: Option<&Variables>) -> Variables {
        let mut resolved = Variables::new();
        for def in &self.variables {
            if let Some(default) = &def.default {
                resolved.insert(def.name.clone(), default.clone());
            }
        }
        if let Some(input) = input {
            for (name, value) in input {
                resolved.insert(name.clone(), value.clone());
            }
        }
        resolved
    }
}

/// Compute the hex SHA-256 of a document's text.
pub fn document_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}
