// src/strategy/mod.rs
mod least_connections;
mod round_robin;
mod sticky;

pub use least_connections::LeastConnectionsStrategy;
pub use round_robin::RoundRobinStrategy;
pub use sticky::StickySessionsStrategy;

use crate::backend::Backend;
use crate::config::SelectionStrategyKind;
use crate::manager::BackendManager;
use std::sync::Arc;

/// The narrow capability every strategy needs from the Backend Manager.
/// Kept as its own trait (rather than depending on `BackendManager`
/// directly) so strategies stay testable against a stub set.
pub trait BackendProvider: Send + Sync {
    fn healthy_snapshot(&self) -> Vec<Arc<Backend>>;
}

impl BackendProvider for BackendManager {
    fn healthy_snapshot(&self) -> Vec<Arc<Backend>> {
        BackendManager::healthy_snapshot(self)
    }
}

/// The outcome of a selection: the chosen backend, if any, plus a cookie
/// value the proxy layer should set on the response (sticky sessions only,
/// and only when the request didn't already present one).
pub struct Selection {
    pub backend: Option<Arc<Backend>>,
    pub new_session_cookie: Option<String>,
}

impl Selection {
    fn none() -> Self {
        Self {
            backend: None,
            new_session_cookie: None,
        }
    }

    fn of(backend: Arc<Backend>) -> Self {
        Self {
            backend: Some(backend),
            new_session_cookie: None,
        }
    }
}

/// Chooses a backend per inbound request. Pure over strategy state: the
/// HTTP side effect of writing a `Set-Cookie` header is left to the proxy
/// layer, which reads `Selection::new_session_cookie`.
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `session_cookie` is the `SESSIONID` cookie value read off the
    /// inbound request, if present. Strategies that don't use sessions
    /// ignore it.
    fn select(&self, session_cookie: Option<&str>) -> Selection;
}

pub fn build_strategy(
    kind: SelectionStrategyKind,
    provider: Arc<dyn BackendProvider>,
) -> Arc<dyn SelectionStrategy> {
    match kind {
        SelectionStrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new(provider)),
        SelectionStrategyKind::LeastConnections => {
            Arc::new(LeastConnectionsStrategy::new(provider))
        }
        SelectionStrategyKind::StickySessions => Arc::new(StickySessionsStrategy::new(provider)),
    }
}
