//! Error types for QUARRY operations

use thiserror::Error;

/// Entity store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Object at {path} has no __typename")]
    MissingTypename { path: String },

    #[error("Key field {field} missing on {typename} at {path}")]
    MissingKeyField {
        typename: String,
        field: String,
        path: String,
    },

    #[error("Shape mismatch at {path}: expected {expected}")]
    ShapeMismatch { path: String, expected: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "No execution context for {operation}: pass a load, component or endpoint context, \
         or fetch from a started client runtime"
    )]
    MissingExecutionContext { operation: String },

    #[error("No transport available for {operation}: configure one on the client or the context")]
    TransportUnavailable { operation: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Transport errors, surfaced through a result's error channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network request for {operation} failed: {reason}")]
    Network { operation: String, reason: String },

    #[error("Request for {operation} returned status {status}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response for {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },
}

/// Master error type for all QUARRY errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuarryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl QuarryError {
    /// Configuration errors are fatal and must never be retried.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias for QUARRY operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_missing_key_field() {
        let err = StoreError::MissingKeyField {
            typename: "User".to_string(),
            field: "id".to_string(),
            path: "viewer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("User"));
        assert!(msg.contains("id"));
        assert!(msg.contains("viewer"));
    }

    #[test]
    fn test_config_error_display_missing_context() {
        let err = ConfigError::MissingExecutionContext {
            operation: "AllUsers".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("AllUsers"));
        assert!(msg.contains("execution context"));
    }

    #[test]
    fn test_transport_error_display_status() {
        let err = TransportError::Status {
            operation: "AllUsers".to_string(),
            status: 502,
            message: "bad gateway".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("502"));
        assert!(msg.contains("bad gateway"));
    }

    #[test]
    fn test_quarry_error_from_variants() {
        let store = QuarryError::from(StoreError::LockPoisoned);
        assert!(matches!(store, QuarryError::Store(_)));
        assert!(!store.is_config());

        let config = QuarryError::from(ConfigError::TransportUnavailable {
            operation: "Q".to_string(),
        });
        assert!(config.is_config());

        let transport = QuarryError::from(TransportError::Network {
            operation: "Q".to_string(),
            reason: "reset".to_string(),
        });
        assert!(matches!(transport, QuarryError::Transport(_)));
    }
}
