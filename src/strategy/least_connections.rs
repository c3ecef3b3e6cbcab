// src/strategy/least_connections.rs
use super::{BackendProvider, Selection, SelectionStrategy};
use std::sync::Arc;

/// Always routes to the healthy backend with the fewest active
/// connections. Ties are broken by snapshot iteration order.
pub struct LeastConnectionsStrategy {
    provider: Arc<dyn BackendProvider>,
}

impl LeastConnectionsStrategy {
    pub fn new(provider: Arc<dyn BackendProvider>) -> Self {
        Self { provider }
    }
}

impl SelectionStrategy for LeastConnectionsStrategy {
    fn name(&self) -> &'static str {
        "least_connections"
    }

    fn select(&self, _session_cookie: Option<&str>) -> Selection {
        let backends = self.provider.healthy_snapshot();
        let chosen = backends
            .into_iter()
            .min_by_key(|b| b.get_connections());

        match chosen {
            Some(backend) => Selection::of(backend),
            None => Selection::none(),
        }
    }
}
