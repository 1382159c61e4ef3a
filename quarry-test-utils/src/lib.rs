//! QUARRY Test Utilities
//!
//! Shared test infrastructure for the QUARRY workspace:
//! - Mock transport with call counting, scripted responses and gating
//! - Fixture documents and response payloads
//! - Proptest generators
//! - Assertions for the error taxonomy

pub use quarry_cache::{Cache, ReadTarget, Snapshot, StaleScope};
pub use quarry_core::{
    Argument, CacheConfig, CachePolicy, ClientConfig, ConfigError, DocumentArtifact, EntityId,
    Field, FieldKey, OperationKind, QuarryError, QuarryResult, Selection, TransportError,
    Variables,
};
pub use quarry_fetch::{
    Client, ExecutionContext, FetchParams, OperationRequest, OperationResponse, QueryResult,
    Session, Transport,
};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

type Scripted = Result<OperationResponse, TransportError>;

#[derive(Default)]
struct MockState {
    calls: AtomicUsize,
    requests: Mutex<Vec<OperationRequest>>,
    sessions: Mutex<Vec<Option<Session>>>,
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Scripted>>,
    delay: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

/// Transport double recording every request.
///
/// Responses come from the scripted queue first, then the fallback, then an
/// empty `data: null` response.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("calls", &self.call_count())
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every unscripted request with `data`.
    pub fn responding(data: serde_json::Value) -> Self {
        let transport = Self::new();
        transport.set_fallback(Ok(OperationResponse::data(data)));
        transport
    }

    /// Fail every unscripted request.
    pub fn failing(reason: impl Into<String>) -> Self {
        let transport = Self::new();
        transport.set_fallback(Err(TransportError::Network {
            operation: "mock".to_string(),
            reason: reason.into(),
        }));
        transport
    }

    pub fn set_fallback(&self, response: Scripted) {
        *self.state.fallback.lock().expect("mock fallback lock") = Some(response);
    }

    /// Queue a response for the next request.
    pub fn push_response(&self, response: OperationResponse) {
        self.state
            .queue
            .lock()
            .expect("mock queue lock")
            .push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.state
            .queue
            .lock()
            .expect("mock queue lock")
            .push_back(Err(error));
    }

    /// Sleep this long before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock().expect("mock delay lock") = Some(delay);
        self
    }

    /// Hold every request until [`release`](Self::release) is called.
    pub fn gated(self) -> Self {
        *self.state.gate.lock().expect("mock gate lock") = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `n` held requests proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.state.gate.lock().expect("mock gate lock").as_ref() {
            gate.add_permits(n);
        }
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<OperationRequest> {
        self.state.requests.lock().expect("mock requests lock").clone()
    }

    pub fn last_request(&self) -> Option<OperationRequest> {
        self.requests().pop()
    }

    pub fn sessions(&self) -> Vec<Option<Session>> {
        self.state.sessions.lock().expect("mock sessions lock").clone()
    }

    /// Yield until at least `n` requests have arrived.
    pub async fn wait_for_calls(&self, n: usize) {
        while self.call_count() < n {
            tokio::task::yield_now().await;
        }
    }

    pub fn as_transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        request: OperationRequest,
        session: Option<&Session>,
    ) -> Result<OperationResponse, TransportError> {
        self.state
            .requests
            .lock()
            .expect("mock requests lock")
            .push(request);
        self.state
            .sessions
            .lock()
            .expect("mock sessions lock")
            .push(session.cloned());
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.state.gate.lock().expect("mock gate lock").clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let delay = *self.state.delay.lock().expect("mock delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.state.queue.lock().expect("mock queue lock").pop_front();
        match scripted {
            Some(response) => response,
            None => self
                .state
                .fallback
                .lock()
                .expect("mock fallback lock")
                .clone()
                .unwrap_or_else(|| Ok(OperationResponse::default())),
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for QUARRY values.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    /// A key value as it appears in response data.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,12}"
    }

    /// A JSON scalar.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            ".{0,16}".prop_map(Value::String),
        ]
    }

    /// A user object matching [`fixtures::user_selection`](super::fixtures::user_selection).
    pub fn arb_user() -> impl Strategy<Value = Value> {
        (arb_key(), ".{0,24}").prop_map(|(id, name)| fixtures::user_json(&id, &name))
    }

    /// A list of users with distinct ids.
    pub fn arb_users(max: usize) -> impl Strategy<Value = Vec<Value>> {
        prop::collection::btree_map(arb_key(), ".{0,24}", 0..max).prop_map(|users| {
            users
                .into_iter()
                .map(|(id, name)| fixtures::user_json(&id, &name))
                .collect()
        })
    }

    /// Variables with scalar values.
    pub fn arb_variables() -> impl Strategy<Value = Variables> {
        prop::collection::btree_map("[a-z]{1,6}", arb_scalar(), 0..4)
            .prop_map(|vars| vars.into_iter().collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Documents and payloads for a small user directory schema.

    use super::*;
    use serde_json::{json, Value};

    pub const ALL_USERS_LIST: &str = "All_Users";

    pub fn user_selection() -> Selection {
        Selection::new(vec![
            Field::scalar("__typename"),
            Field::scalar("id"),
            Field::scalar("name"),
        ])
    }

    pub fn user_json(id: &str, name: &str) -> Value {
        json!({"__typename": "User", "id": id, "name": name})
    }

    pub fn user_id(id: &str) -> EntityId {
        EntityId::keyed("User", [id])
    }

    /// `query AllUsers { users @list(name: "All_Users") { id name } }`
    pub fn all_users_query() -> DocumentArtifact {
        DocumentArtifact::new(
            "AllUsers",
            OperationKind::Query,
            r#"query AllUsers { users @list(name: "All_Users") { id name } }"#,
            Selection::new(vec![
                Field::object("users", user_selection()).list(ALL_USERS_LIST)
            ]),
        )
    }

    pub fn all_users_response(users: &[(&str, &str)]) -> Value {
        json!({
            "users": users.iter().map(|(id, name)| user_json(id, name)).collect::<Vec<_>>()
        })
    }

    /// `query UserById($id: ID = "1") { user(id: $id) { id name } }`
    pub fn user_by_id_query() -> DocumentArtifact {
        DocumentArtifact::new(
            "UserById",
            OperationKind::Query,
            r#"query UserById($id: ID = "1") { user(id: $id) { id name } }"#,
            Selection::new(vec![Field::object("user", user_selection())
                .arg("id", Argument::Variable("id".to_string()))]),
        )
        .with_variable("id", Some(json!("1")))
    }

    pub fn user_by_id_response(id: &str, name: &str) -> Value {
        json!({ "user": user_json(id, name) })
    }

    /// `mutation RenameUser($id: ID!, $name: String!) { renameUser(id: $id, name: $name) { id name } }`
    pub fn rename_user_mutation() -> DocumentArtifact {
        DocumentArtifact::new(
            "RenameUser",
            OperationKind::Mutation,
            "mutation RenameUser($id: ID!, $name: String!) { renameUser(id: $id, name: $name) { id name } }",
            Selection::new(vec![Field::object("renameUser", user_selection())
                .arg("id", Argument::Variable("id".to_string()))
                .arg("name", Argument::Variable("name".to_string()))]),
        )
    }

    pub fn rename_user_response(id: &str, name: &str) -> Value {
        json!({ "renameUser": user_json(id, name) })
    }

    pub fn variables(pairs: &[(&str, Value)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// A client with a default-config cache and `transport` installed.
    pub fn client_with(transport: &MockTransport) -> Client {
        Client::new(ClientConfig::default())
            .expect("default config is valid")
            .with_transport(transport.as_transport())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over QUARRY results.

    use super::*;

    /// Assert that a result failed with a configuration error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a result failed because no execution context was available.
    #[track_caller]
    pub fn assert_missing_context<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Config(ConfigError::MissingExecutionContext { .. })) => {}
            other => panic!("Expected MissingExecutionContext, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_transport_serves_queue_then_fallback() {
        let transport = MockTransport::responding(json!({"fallback": true}));
        transport.push_response(OperationResponse::data(json!({"first": true})));
        let request = OperationRequest::new(&fixtures::all_users_query(), Variables::new(), None);

        let first = transport.execute(request.clone(), None).await.unwrap();
        let second = transport.execute(request, None).await.unwrap();
        assert_eq!(first.data, Some(json!({"first": true})));
        assert_eq!(second.data, Some(json!({"fallback": true})));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_transport_waits_before_answering() {
        let transport = MockTransport::responding(json!({})).with_delay(Duration::from_millis(500));
        let request = OperationRequest::new(&fixtures::all_users_query(), Variables::new(), None);
        let started = tokio::time::Instant::now();
        transport.execute(request, None).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_gated_transport_holds_until_released() {
        let transport = MockTransport::responding(json!({})).gated();
        let request = OperationRequest::new(&fixtures::all_users_query(), Variables::new(), None);
        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.execute(request, None).await })
        };
        transport.wait_for_calls(1).await;
        assert!(!pending.is_finished());
        transport.release(1);
        assert!(pending.await.unwrap().is_ok());
    }

    proptest! {
        /// Property: undeclared caller variables pass through untouched.
        #[test]
        fn prop_resolve_variables_passes_caller_values(vars in generators::arb_variables()) {
            let artifact = fixtures::all_users_query();
            prop_assert_eq!(artifact.resolve_variables(Some(&vars)), vars);
        }

        /// Property: declared defaults yield only to caller values.
        #[test]
        fn prop_declared_default_is_overridden(vars in generators::arb_variables()) {
            let artifact = fixtures::user_by_id_query();
            let resolved = artifact.resolve_variables(Some(&vars));
            let expected = vars.get("id").cloned().unwrap_or_else(|| json!("1"));
            prop_assert_eq!(resolved.get("id"), Some(&expected));
        }
    }
}
