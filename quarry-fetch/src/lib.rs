//! QUARRY Fetch - Policy-Driven Fetch Orchestrator
//!
//! Sits in front of the cache and decides, per cache policy and execution
//! context, whether a document is answered from the store, the network or
//! both. Load-path and component-path fetches of the same store are
//! deduplicated; transports are injected.

pub mod client;
pub mod context;
pub mod mutation_store;
pub mod query_store;
pub mod result;
pub mod transport;

pub use client::Client;
pub use context::{ContextKind, ContextResources, ExecutionContext};
pub use mutation_store::MutationStore;
pub use query_store::{CallbackError, CompletionCallback, FetchParams, FetchPhase, QueryStore};
pub use result::{DataSource, FetchError, QueryResult};
pub use transport::{OperationRequest, OperationResponse, ResponseError, Session, Transport};
