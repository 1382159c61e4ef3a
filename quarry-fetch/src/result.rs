//! Fetch results.

use chrono::{DateTime, Utc};
use quarry_cache::Snapshot;
use quarry_core::{StoreError, TransportError, Variables};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::transport::ResponseError;

/// Where the data in a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataSource {
    Cache,
    Network,
}

/// Error surfaced through a result instead of failing the fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response data did not fit the document's selection.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{}", .0.message)]
    Operation(ResponseError),
}

/// Current state of one document's data.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub data: Value,
    pub errors: Vec<FetchError>,
    /// A network request for this store is outstanding.
    pub fetching: bool,
    pub partial: bool,
    pub stale: bool,
    pub source: Option<DataSource>,
    pub variables: Variables,
    pub updated_at: DateTime<Utc>,
}

impl Default for QueryResult {
    fn default() -> Self {
        Self {
            data: Value::Null,
            errors: Vec::new(),
            fetching: false,
            partial: false,
            stale: false,
            source: None,
            variables: Variables::new(),
            updated_at: Utc::now(),
        }
    }
}

impl QueryResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub(crate) fn apply_snapshot(&mut self, snapshot: &Snapshot) {
        self.data = snapshot.data.clone();
        self.partial = snapshot.partial;
        self.stale = snapshot.stale;
        self.updated_at = Utc::now();
    }
}
