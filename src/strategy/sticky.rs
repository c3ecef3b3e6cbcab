// src/strategy/sticky.rs
use super::{BackendProvider, RoundRobinStrategy, Selection, SelectionStrategy};
use crate::backend::Backend;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Routes by a `SESSIONID` cookie when one maps to a still-alive backend;
/// otherwise falls back to round-robin and records the new mapping.
///
/// A mapping whose backend is no longer alive is evicted lazily, on
/// lookup — this also covers backends the Manager has removed from the
/// set entirely, since removal marks them dead before dropping them.
pub struct StickySessionsStrategy {
    sessions: RwLock<HashMap<String, Arc<Backend>>>,
    fallback: RoundRobinStrategy,
}

impl StickySessionsStrategy {
    pub fn new(provider: Arc<dyn BackendProvider>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            fallback: RoundRobinStrategy::new(provider),
        }
    }
}

impl SelectionStrategy for StickySessionsStrategy {
    fn name(&self) -> &'static str {
        "sticky_sessions"
    }

    fn select(&self, session_cookie: Option<&str>) -> Selection {
        if let Some(session_id) = session_cookie {
            let existing = self.sessions.read().unwrap().get(session_id).cloned();
            match existing {
                Some(backend) if backend.is_alive() => {
                    return Selection::of(backend);
                }
                Some(_) => {
                    self.sessions.write().unwrap().remove(session_id);
                }
                None => {}
            }
        }

        let picked = self.fallback.select(None);
        let Some(backend) = picked.backend else {
            return Selection::none();
        };

        let session_id = session_cookie
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.sessions
            .write()
            .unwrap()
            .insert(session_id.clone(), backend.clone());

        Selection {
            backend: Some(backend),
            // Only issue a fresh cookie when the client didn't present one.
            new_session_cookie: if session_cookie.is_none() {
                Some(session_id)
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::metrics::MetricsCollector;
    use url::Url;

    struct FixedProvider(RwLock<Vec<Arc<Backend>>>);
    impl BackendProvider for FixedProvider {
        fn healthy_snapshot(&self) -> Vec<Arc<Backend>> {
            self.0.read().unwrap().clone()
        }
    }

    fn backend(id: &str) -> Arc<Backend> {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let backend = Backend::new(
            id.to_string(),
            Url::parse("http://127.0.0.1:8000").unwrap(),
            "/health".to_string(),
            metrics,
        );
        // `FixedProvider` stands in for a manager's already-filtered
        // healthy snapshot, so its members should already be alive.
        backend.set_alive(true);
        Arc::new(backend)
    }

    #[test]
    fn first_request_with_no_cookie_issues_one_and_sticks() {
        let a = backend("a");
        let provider = Arc::new(FixedProvider(RwLock::new(vec![a.clone()])));
        let strategy = StickySessionsStrategy::new(provider);

        let first = strategy.select(None);
        assert_eq!(first.backend.as_ref().unwrap().instance_id, "a");
        let cookie = first.new_session_cookie.expect("should issue a cookie");

        let second = strategy.select(Some(&cookie));
        assert_eq!(second.backend.unwrap().instance_id, "a");
        assert!(second.new_session_cookie.is_none());
    }

    #[test]
    fn reroutes_when_sticky_backend_becomes_unhealthy() {
        let a = backend("a");
        let b = backend("b");
        let provider = Arc::new(FixedProvider(RwLock::new(vec![a.clone()])));
        let strategy = StickySessionsStrategy::new(provider.clone());

        let first = strategy.select(None);
        let cookie = first.new_session_cookie.unwrap();
        assert_eq!(first.backend.unwrap().instance_id, "a");

        a.set_alive(false);
        *provider.0.write().unwrap() = vec![b.clone()];

        let third = strategy.select(Some(&cookie));
        assert_eq!(third.backend.unwrap().instance_id, "b");
    }

    #[test]
    fn existing_cookie_is_honored_not_inverted() {
        let a = backend("a");
        let b = backend("b");
        let provider = Arc::new(FixedProvider(RwLock::new(vec![a.clone(), b.clone()])));
        let strategy = StickySessionsStrategy::new(provider);

        let first = strategy.select(None);
        let cookie = first.new_session_cookie.unwrap();
        let picked_first = first.backend.unwrap().instance_id.clone();

        // Ten repeats with the same cookie must all land on the same
        // backend the first call picked.
        for _ in 0..10 {
            let next = strategy.select(Some(&cookie));
            assert_eq!(next.backend.unwrap().instance_id, picked_first);
            assert!(next.new_session_cookie.is_none());
        }
    }
}
