//! Client runtime.

use quarry_cache::Cache;
use quarry_core::{ClientConfig, ConfigError, DocumentArtifact, QuarryResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::{ContextKind, ExecutionContext};
use crate::mutation_store::MutationStore;
use crate::query_store::QueryStore;
use crate::transport::{Session, Transport};

/// Shared cache, default transport and configuration for every store.
#[derive(Clone)]
pub struct Client {
    cache: Cache,
    transport: Option<Arc<dyn Transport>>,
    config: Arc<ClientConfig>,
    started: Arc<AtomicBool>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("cache", &self.cache)
            .field("transport", &self.transport.is_some())
            .field("config", &self.config)
            .field("started", &self.is_started())
            .finish()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> QuarryResult<Self> {
        config.validate()?;
        let cache = Cache::new(config.cache.clone())?;
        Ok(Self {
            cache,
            transport: None,
            config: Arc::new(config),
            started: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Set the transport used when a context does not bring its own.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Flag the client as running in a live UI runtime.
    ///
    /// After this, fetches without a context are component fetches and
    /// load fetches may take the non-blocking path.
    pub fn mark_started(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            tracing::info!("Client runtime started");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn query_store(&self, artifact: DocumentArtifact) -> QueryStore {
        QueryStore::new(self.clone(), artifact)
    }

    pub fn mutation_store(&self, artifact: DocumentArtifact) -> MutationStore {
        MutationStore::new(self.clone(), artifact)
    }

    /// Kind of path a fetch runs on, failing when there is none.
    pub(crate) fn context_kind(
        &self,
        context: Option<&ExecutionContext>,
        operation: &str,
    ) -> Result<ContextKind, ConfigError> {
        match context {
            Some(ctx) => Ok(ctx.kind()),
            None if self.is_started() => Ok(ContextKind::Component),
            None => Err(ConfigError::MissingExecutionContext {
                operation: operation.to_string(),
            }),
        }
    }

    /// Transport and session for a request: the context's own, then the
    /// client's.
    pub(crate) fn resolve_transport(
        &self,
        context: Option<&ExecutionContext>,
        operation: &str,
    ) -> Result<(Arc<dyn Transport>, Option<Session>), ConfigError> {
        let resources = context.map(ExecutionContext::resources);
        let transport = resources
            .and_then(|r| r.transport.clone())
            .or_else(|| self.transport.clone())
            .ok_or_else(|| ConfigError::TransportUnavailable {
                operation: operation.to_string(),
            })?;
        let session = resources.and_then(|r| r.session.clone());
        Ok((transport, session))
    }
}
