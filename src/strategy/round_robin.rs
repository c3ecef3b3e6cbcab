// src/strategy/round_robin.rs
use super::{BackendProvider, Selection, SelectionStrategy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Monotone per-instance counter. Fairness is only eventual: the increment
/// is atomic so concurrent requests never pick the same index out of
/// order, but no global ordering across requests is guaranteed.
pub struct RoundRobinStrategy {
    provider: Arc<dyn BackendProvider>,
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new(provider: Arc<dyn BackendProvider>) -> Self {
        Self {
            provider,
            counter: AtomicUsize::new(0),
        }
    }
}

impl SelectionStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, _session_cookie: Option<&str>) -> Selection {
        let backends = self.provider.healthy_snapshot();
        if backends.is_empty() {
            return Selection::none();
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % backends.len();
        Selection::of(backends[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::metrics::MetricsCollector;
    use url::Url;

    struct FixedProvider(Vec<Arc<Backend>>);
    impl BackendProvider for FixedProvider {
        fn healthy_snapshot(&self) -> Vec<Arc<Backend>> {
            self.0.clone()
        }
    }

    fn backend(id: &str) -> Arc<Backend> {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        Arc::new(Backend::new(
            id.to_string(),
            Url::parse("http://127.0.0.1:8000").unwrap(),
            "/health".to_string(),
            metrics,
        ))
    }

    #[test]
    fn empty_set_returns_none() {
        let strategy = RoundRobinStrategy::new(Arc::new(FixedProvider(vec![])));
        assert!(strategy.select(None).backend.is_none());
    }

    #[test]
    fn distributes_evenly_across_two_backends() {
        let a = backend("a");
        let b = backend("b");
        let strategy = RoundRobinStrategy::new(Arc::new(FixedProvider(vec![a.clone(), b.clone()])));

        let picks: Vec<String> = (0..4)
            .map(|_| strategy.select(None).backend.unwrap().instance_id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn fairness_over_many_requests() {
        let backends: Vec<Arc<Backend>> = (0..3).map(|i| backend(&i.to_string())).collect();
        let strategy = RoundRobinStrategy::new(Arc::new(FixedProvider(backends.clone())));

        let mut counts = std::collections::HashMap::new();
        for _ in 0..99 {
            let id = strategy.select(None).backend.unwrap().instance_id.clone();
            *counts.entry(id).or_insert(0) += 1;
        }
        for backend in &backends {
            assert_eq!(counts[&backend.instance_id], 33);
        }
    }

    proptest::proptest! {
        // Fairness invariant (spec.md §8): over any multiple of the
        // backend count, every backend is selected exactly that many
        // times, regardless of how many backends there are.
        #[test]
        fn fairness_holds_for_any_backend_count(backend_count in 1usize..8, rounds in 1usize..20) {
            let backends: Vec<Arc<Backend>> = (0..backend_count).map(|i| backend(&i.to_string())).collect();
            let strategy = RoundRobinStrategy::new(Arc::new(FixedProvider(backends.clone())));

            let mut counts = std::collections::HashMap::new();
            for _ in 0..(backend_count * rounds) {
                let id = strategy.select(None).backend.unwrap().instance_id.clone();
                *counts.entry(id).or_insert(0) += 1;
            }
            for backend in &backends {
                proptest::prop_assert_eq!(counts[&backend.instance_id], rounds);
            }
        }
    }
}
