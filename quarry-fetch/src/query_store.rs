//! Per-document fetch orchestration.
//!
//! A `QueryStore` owns one observer over its document's selection and
//! publishes a `QueryResult` through a watch channel. `fetch` decides per
//! policy whether to answer from the cache, the network or both.
//!
//! Two flags guard duplicate work. `load_pending` is set while a load-path
//! fetch is unsettled; a component fetch arriving meanwhile is answered with
//! the current result and never reaches the transport. `in_flight` counts
//! outstanding network requests independently of the path that sent them.

use quarry_cache::{Observer, ReadTarget, Snapshot};
use quarry_core::{
    CachePolicy, DocumentArtifact, QuarryError, QuarryResult, StoreError, Variables,
};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::client::Client;
use crate::context::{ContextKind, ExecutionContext};
use crate::result::{DataSource, FetchError, QueryResult};
use crate::transport::{OperationRequest, Session, Transport};

/// Error returned by a completion callback. It is logged, never propagated.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Runs once a fetch settles, with the settled result.
///
/// Failures are reported by returning `Err`, which is logged and dropped.
/// A panicking callback is not caught: on the blocking path it unwinds
/// through `fetch`, on the background path it ends the spawned task.
pub type CompletionCallback = Arc<dyn Fn(&QueryResult) -> Result<(), CallbackError> + Send + Sync>;

/// Lifecycle of a store's fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    /// A load-path fetch has not settled yet.
    LoadPending,
    /// A network request is outstanding.
    InFlight,
}

/// Arguments to [`QueryStore::fetch`].
#[derive(Clone, Default)]
pub struct FetchParams {
    pub variables: Option<Variables>,
    pub policy: Option<CachePolicy>,
    pub context: Option<ExecutionContext>,
    /// `Some(true)` forces a load fetch to wait for the network.
    pub blocking: Option<bool>,
    /// Passed through to the transport untouched.
    pub metadata: Option<Value>,
    pub then: Option<CompletionCallback>,
}

impl fmt::Debug for FetchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchParams")
            .field("variables", &self.variables)
            .field("policy", &self.policy)
            .field("context", &self.context)
            .field("blocking", &self.blocking)
            .field("metadata", &self.metadata)
            .field("then", &self.then.is_some())
            .finish()
    }
}

impl FetchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = Some(blocking);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Run `callback` once the fetch settles. See [`CompletionCallback`].
    pub fn then<F>(mut self, callback: F) -> Self
    where
        F: Fn(&QueryResult) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.then = Some(Arc::new(callback));
        self
    }
}

/// Everything one network round trip needs.
struct Request {
    policy: CachePolicy,
    variables: Variables,
    transport: Option<Arc<dyn Transport>>,
    session: Option<Session>,
    metadata: Option<Value>,
}

struct QueryStoreInner {
    client: Client,
    artifact: DocumentArtifact,
    load_pending: AtomicBool,
    in_flight: AtomicUsize,
    observer: Mutex<Option<Observer>>,
    result: Arc<watch::Sender<QueryResult>>,
}

/// Fetch orchestrator for one query document.
#[derive(Clone)]
pub struct QueryStore {
    inner: Arc<QueryStoreInner>,
}

impl fmt::Debug for QueryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStore")
            .field("document", &self.inner.artifact.name)
            .field("phase", &self.phase())
            .finish()
    }
}

impl QueryStore {
    pub(crate) fn new(client: Client, artifact: DocumentArtifact) -> Self {
        let (result, _) = watch::channel(QueryResult::default());
        Self {
            inner: Arc::new(QueryStoreInner {
                client,
                artifact,
                load_pending: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                observer: Mutex::new(None),
                result: Arc::new(result),
            }),
        }
    }

    pub fn artifact(&self) -> &DocumentArtifact {
        &self.inner.artifact
    }

    /// Receiver of every published result.
    pub fn subscribe(&self) -> watch::Receiver<QueryResult> {
        self.inner.result.subscribe()
    }

    /// Latest published result.
    pub fn current(&self) -> QueryResult {
        self.inner.result.borrow().clone()
    }

    pub fn phase(&self) -> FetchPhase {
        if self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            FetchPhase::InFlight
        } else if self.inner.load_pending.load(Ordering::SeqCst) {
            FetchPhase::LoadPending
        } else {
            FetchPhase::Idle
        }
    }

    /// Unsubscribe the store's observer so its entities can be collected.
    pub fn release(&self) -> QuarryResult<()> {
        if let Some(observer) = self.observer()?.take() {
            self.inner.client.cache().unsubscribe(observer.id())?;
        }
        Ok(())
    }

    /// Fetch the document.
    ///
    /// Configuration problems fail the call. Transport failures and
    /// server-reported errors land in the returned result's `errors`.
    pub async fn fetch(&self, params: FetchParams) -> QuarryResult<QueryResult> {
        let inner = &self.inner;
        let name = inner.artifact.name.as_str();
        let kind = inner.client.context_kind(params.context.as_ref(), name)?;
        let policy = params
            .policy
            .or(inner.artifact.default_policy)
            .unwrap_or(inner.client.config().default_policy);

        if kind == ContextKind::Component && inner.load_pending.load(Ordering::SeqCst) {
            tracing::warn!(
                document = %name,
                policy = ?policy,
                "Component fetch ignored while a load fetch is pending; \
                 use the CacheOnly policy for component reads during navigation"
            );
            return Ok(self.current());
        }

        let (transport, session) = match policy {
            CachePolicy::CacheOnly => (None, None),
            _ => {
                let (transport, session) = inner
                    .client
                    .resolve_transport(params.context.as_ref(), name)?;
                (Some(transport), session)
            }
        };
        let variables = inner.artifact.resolve_variables(params.variables.as_ref());
        self.bind(&variables)?;

        let request = Request {
            policy,
            variables,
            transport,
            session,
            metadata: params.metadata,
        };

        let is_load = kind == ContextKind::Load;
        if is_load {
            inner.load_pending.store(true, Ordering::SeqCst);
        }

        let fast_path = is_load && inner.client.is_started() && params.blocking != Some(true);
        if fast_path {
            if policy != CachePolicy::NetworkOnly {
                self.silent_cache_pass(&request.variables);
            }
            tracing::debug!(document = %name, policy = ?policy, "Load fetch continuing in background");
            let store = self.clone();
            let then = params.then;
            tokio::spawn(async move {
                let result = store.run(request).await;
                store.inner.load_pending.store(false, Ordering::SeqCst);
                if result.has_errors() {
                    tracing::warn!(
                        document = %store.inner.artifact.name,
                        errors = result.errors.len(),
                        "Discarded failure of background load fetch"
                    );
                }
                complete(then.as_ref(), &result, &store.inner.artifact.name);
            });
            return Ok(self.current());
        }

        let result = self.run(request).await;
        if is_load {
            inner.load_pending.store(false, Ordering::SeqCst);
        }
        complete(params.then.as_ref(), &result, name);
        Ok(result)
    }

    fn observer(&self) -> Result<MutexGuard<'_, Option<Observer>>, StoreError> {
        self.inner
            .observer
            .lock()
            .map_err(|_| StoreError::LockPoisoned)
    }

    /// Point the store's observer at `variables`, subscribing on first use.
    fn bind(&self, variables: &Variables) -> QuarryResult<()> {
        let cache = self.inner.client.cache();
        let mut observer = self.observer()?;
        let previous = self.inner.result.borrow().variables.clone();
        match observer.as_ref() {
            Some(existing) if previous != *variables => {
                tracing::debug!(document = %self.inner.artifact.name, "Variables changed; moving observer");
                cache.update_variables(existing.id(), variables.clone())?;
            }
            Some(_) => {}
            None => {
                let sender = Arc::clone(&self.inner.result);
                let created = cache.subscribe(
                    ReadTarget::Root,
                    self.inner.artifact.selection.clone(),
                    variables.clone(),
                    Some(Arc::new(move |snapshot: &Snapshot| {
                        sender.send_modify(|result| result.apply_snapshot(snapshot));
                    })),
                )?;
                *observer = Some(created);
            }
        }
        self.inner.result.send_if_modified(|result| {
            if result.variables == *variables {
                return false;
            }
            result.variables = variables.clone();
            true
        });
        Ok(())
    }

    /// Publish cached data without a caller-visible echo when there is none.
    fn silent_cache_pass(&self, variables: &Variables) {
        let cache = self.inner.client.cache();
        match cache.read_query(&self.inner.artifact.selection, variables) {
            Ok(outcome) if outcome.has_data() => {
                self.inner.result.send_modify(|result| {
                    result.apply_snapshot(&outcome.snapshot());
                    result.source = Some(DataSource::Cache);
                });
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Silent cache pass failed"),
        }
    }

    /// Apply `policy`; never fails, errors are folded into the result.
    async fn run(&self, request: Request) -> QueryResult {
        let name = self.inner.artifact.name.as_str();
        let cache = self.inner.client.cache();
        let selection = &self.inner.artifact.selection;

        let cached = match cache.read_query(selection, &request.variables) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(document = %name, error = %e, "Cache read failed");
                None
            }
        };
        let publish_cached = |fetching: bool| {
            if let Some(outcome) = &cached {
                self.inner.result.send_modify(|result| {
                    result.apply_snapshot(&outcome.snapshot());
                    result.errors.clear();
                    result.fetching = fetching;
                    result.source = Some(DataSource::Cache);
                });
            }
        };

        let go_network = match request.policy {
            CachePolicy::CacheOnly => false,
            CachePolicy::NetworkOnly => true,
            CachePolicy::CacheAndNetwork => {
                if cached.as_ref().is_some_and(|o| o.has_data()) {
                    publish_cached(true);
                }
                true
            }
            CachePolicy::CacheOrNetwork => !cached
                .as_ref()
                .is_some_and(|o| !o.partial && !o.stale),
        };
        tracing::debug!(document = %name, policy = ?request.policy, network = go_network, "Policy decision");

        let Some(transport) = request.transport.clone().filter(|_| go_network) else {
            publish_cached(self.inner.in_flight.load(Ordering::SeqCst) > 0);
            return self.current();
        };
        self.network(request, transport).await
    }

    async fn network(&self, request: Request, transport: Arc<dyn Transport>) -> QueryResult {
        let inner = &self.inner;
        let cache = inner.client.cache();
        let selection = &inner.artifact.selection;

        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        inner.result.send_modify(|result| result.fetching = true);

        let operation = OperationRequest::new(&inner.artifact, request.variables.clone(), request.metadata);
        let request_id = operation.id;
        let response = transport.execute(operation, request.session.as_ref()).await;

        let mut errors = Vec::new();
        let mut wrote = false;
        match response {
            Ok(response) => {
                errors.extend(response.errors.into_iter().map(FetchError::Operation));
                if let Some(data) = response.data.filter(|d| !d.is_null()) {
                    match cache.write_query(selection, &data, &request.variables) {
                        Ok(_) => wrote = true,
                        Err(e) => {
                            tracing::warn!(document = %inner.artifact.name, error = %e, "Response did not fit selection");
                            if let QuarryError::Store(store) = e {
                                errors.push(FetchError::Store(store));
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(
                    document = %inner.artifact.name,
                    request_id = %request_id,
                    error = %e,
                    "Transport request failed"
                );
                errors.push(FetchError::Transport(e));
            }
        }

        let remaining = inner.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        let fresh = cache.read_query(selection, &request.variables).ok();
        inner.result.send_modify(|result| {
            if let Some(outcome) = &fresh {
                result.apply_snapshot(&outcome.snapshot());
            }
            result.errors = errors;
            result.fetching = remaining > 0;
            if wrote {
                result.source = Some(DataSource::Network);
            }
        });
        self.current()
    }
}

/// Invoke a completion callback, swallowing its failure.
fn complete(callback: Option<&CompletionCallback>, result: &QueryResult, document: &str) {
    if let Some(callback) = callback {
        if let Err(e) = callback(result) {
            tracing::warn!(document = %document, error = %e, "Completion callback failed");
        }
    }
}
