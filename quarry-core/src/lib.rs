//! QUARRY Core - Data Types
//!
//! Pure data structures shared by the cache engine and the fetch
//! orchestrator: entity identity, field keys, stored values, compiled
//! selections, document artifacts, configuration and the error taxonomy.

pub mod artifact;
pub mod config;
pub mod error;
pub mod ids;
pub mod selection;
pub mod value;

pub use artifact::{document_hash, CachePolicy, DocumentArtifact, OperationKind, VariableDefinition};
pub use config::{CacheConfig, ClientConfig, ListRemoveMode};
pub use error::{ConfigError, QuarryError, QuarryResult, StoreError, TransportError};
pub use ids::{canonical_json, render_key_value, EntityId, FieldKey, ROOT_ID};
pub use selection::{Argument, Field, ListDirective, Selection, Variables};
pub use value::{ListPosition, StoredValue};

/// Field name carrying an object's concrete type in response data.
pub const TYPENAME_FIELD: &str = "__typename";
