//! Execution contexts.
//!
//! Every fetch says where it was issued from. The kind decides the
//! load-pending rules; the attached resources supply the transport and
//! session the request runs with.

use std::fmt;
use std::sync::Arc;

use crate::transport::{Session, Transport};

/// Which invocation path issued a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Framework-driven page load.
    Load,
    /// Reactive UI binding.
    Component,
    /// Server-side request handler.
    Endpoint,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Component => write!(f, "component"),
            Self::Endpoint => write!(f, "endpoint"),
        }
    }
}

/// Transport and session supplied by the caller's environment.
#[derive(Clone, Default)]
pub struct ContextResources {
    pub transport: Option<Arc<dyn Transport>>,
    pub session: Option<Session>,
}

impl fmt::Debug for ContextResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextResources")
            .field("transport", &self.transport.is_some())
            .field("session", &self.session)
            .finish()
    }
}

/// Tagged execution context handed to `fetch`.
#[derive(Debug, Clone)]
pub enum ExecutionContext {
    Load(ContextResources),
    Component(ContextResources),
    Endpoint(ContextResources),
}

impl ExecutionContext {
    pub fn load() -> Self {
        Self::Load(ContextResources::default())
    }

    pub fn component() -> Self {
        Self::Component(ContextResources::default())
    }

    pub fn endpoint() -> Self {
        Self::Endpoint(ContextResources::default())
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.resources_mut().transport = Some(transport);
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.resources_mut().session = Some(session);
        self
    }

    pub fn kind(&self) -> ContextKind {
        match self {
            Self::Load(_) => ContextKind::Load,
            Self::Component(_) => ContextKind::Component,
            Self::Endpoint(_) => ContextKind::Endpoint,
        }
    }

    pub fn resources(&self) -> &ContextResources {
        match self {
            Self::Load(r) | Self::Component(r) | Self::Endpoint(r) => r,
        }
    }

    fn resources_mut(&mut self) -> &mut ContextResources {
        match self {
            Self::Load(r) | Self::Component(r) | Self::Endpoint(r) => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builders_keep_kind() {
        let ctx = ExecutionContext::endpoint().with_session(Session::new(json!({"user": "u1"})));
        assert_eq!(ctx.kind(), ContextKind::Endpoint);
        assert_eq!(
            ctx.resources().session.as_ref().and_then(|s| s.get("user")),
            Some(&json!("u1"))
        );
        assert!(ctx.resources().transport.is_none());
    }
}
