//! Transport abstraction.
//!
//! The orchestrator never speaks a wire protocol itself: a `Transport` takes
//! an operation request and returns response data plus operation errors.
//! Failures to get a response at all are `TransportError`s.

use async_trait::async_trait;
use quarry_core::{DocumentArtifact, OperationKind, TransportError, Variables};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque per-caller session data handed through to the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session(pub Value);

impl Session {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// One operation as sent to a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Unique per request.
    pub id: Uuid,
    pub name: String,
    pub kind: OperationKind,
    /// Document text.
    pub text: String,
    pub hash: String,
    pub variables: Variables,
    pub metadata: Value,
}

impl OperationRequest {
    pub fn new(artifact: &DocumentArtifact, variables: Variables, metadata: Option<Value>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: artifact.name.clone(),
            kind: artifact.kind,
            text: artifact.raw.clone(),
            hash: artifact.hash.clone(),
            variables,
            metadata: metadata.unwrap_or(Value::Null),
        }
    }
}

/// An error the server reported alongside (or instead of) data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
}

impl ResponseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }
}

/// Response as returned by a transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<ResponseError>,
}

impl OperationResponse {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn errors(errors: Vec<ResponseError>) -> Self {
        Self { data: None, errors }
    }
}

/// Sends operations to a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one operation.
    async fn execute(
        &self,
        request: OperationRequest,
        session: Option<&Session>,
    ) -> Result<OperationResponse, TransportError>;
}
