// src/backend.rs
use crate::metrics::MetricsCollector;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use url::Url;

/// The error-burst threshold and window that trips the circuit breaker.
/// More than this many errors within this window forces the backend out
/// of rotation without waiting for the next health probe.
const CIRCUIT_BREAKER_ERROR_THRESHOLD: u32 = 4;
const CIRCUIT_BREAKER_WINDOW: chrono::Duration = chrono::Duration::seconds(10);

/// Mutable health bookkeeping. Kept behind one lock so a `record_error`
/// call that trips the breaker flips `alive` and resets the error window
/// as a single atomic step, never observed half-done.
#[derive(Debug)]
struct HealthState {
    alive: bool,
    error_count: u32,
    last_error_at: Option<DateTime<Utc>>,
}

/// One upstream instance, identified by the registry's stable `instance_id`.
///
/// `url` and `health_path` may be refreshed in place by the discovery loop
/// when the registry reports updated data for the same id; `instance_id`
/// never changes for the lifetime of a `Backend`.
#[derive(Debug)]
pub struct Backend {
    pub instance_id: String,
    fields: arc_swap::ArcSwap<BackendFields>,
    active_connections: AtomicI64,
    health: RwLock<HealthState>,
    metrics: Arc<MetricsCollector>,
}

#[derive(Debug, Clone)]
struct BackendFields {
    url: Url,
    health_path: String,
}

impl Backend {
    pub fn new(instance_id: String, url: Url, health_path: String, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            instance_id,
            fields: arc_swap::ArcSwap::from_pointee(BackendFields { url, health_path }),
            active_connections: AtomicI64::new(0),
            // A freshly discovered backend is not routable until a health
            // probe confirms it.
            health: RwLock::new(HealthState {
                alive: false,
                error_count: 0,
                last_error_at: None,
            }),
            metrics,
        }
    }

    pub fn url(&self) -> Url {
        self.fields.load().url.clone()
    }

    pub fn health_path(&self) -> String {
        self.fields.load().health_path.clone()
    }

    /// Called by the discovery loop when the registry reports fresh data
    /// for a previously-known instance id. `instance_id` itself never
    /// changes.
    pub fn refresh_fields(&self, url: Url, health_path: String) {
        self.fields.store(Arc::new(BackendFields { url, health_path }));
    }

    /// Full absolute URL to probe for health: `url` with `health_path`
    /// appended.
    pub fn health_url(&self) -> Url {
        let fields = self.fields.load();
        fields
            .url
            .join(&fields.health_path)
            .unwrap_or_else(|_| fields.url.clone())
    }

    pub fn is_alive(&self) -> bool {
        self.health.read().unwrap().alive
    }

    /// Atomic flip; transitioning to healthy also clears the error window.
    pub fn set_alive(&self, alive: bool) {
        let mut state = self.health.write().unwrap();
        state.alive = alive;
        if alive {
            state.error_count = 0;
        }
        self.metrics
            .update_backend_status(&self.host(), &self.instance_id, alive);
    }

    pub fn get_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn increment_connections(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics
            .update_backend_connections(&self.host(), &self.instance_id, count);
    }

    /// Saturating decrement: a connection counter observed from outside
    /// never goes negative, even under a surplus decrement.
    pub fn decrement_connections(&self) {
        let mut current = self.active_connections.load(Ordering::SeqCst);
        loop {
            let next = (current - 1).max(0);
            match self.active_connections.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.metrics
                        .update_backend_connections(&self.host(), &self.instance_id, next);
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Records a failed forward. If more than
    /// [`CIRCUIT_BREAKER_ERROR_THRESHOLD`] errors land within
    /// [`CIRCUIT_BREAKER_WINDOW`], the backend is yanked from rotation
    /// immediately — the health-check loop is what restores it later.
    pub fn record_error(&self) {
        let now = Utc::now();
        let mut state = self.health.write().unwrap();
        state.error_count += 1;
        state.last_error_at = Some(now);

        let burst = state
            .last_error_at
            .map(|t| now - t < CIRCUIT_BREAKER_WINDOW)
            .unwrap_or(false);

        if state.alive && state.error_count > CIRCUIT_BREAKER_ERROR_THRESHOLD && burst {
            state.alive = false;
            tracing::warn!(
                backend_id = %self.instance_id,
                url = %self.url(),
                "backend marked unhealthy due to repeated errors"
            );
            self.metrics
                .update_backend_status(&self.host(), &self.instance_id, false);
            // Only the exported gauge is zeroed; the real in-flight count
            // is left alone so in-flight requests still balance their
            // own decrement.
            self.metrics.update_backend_connections(&self.host(), &self.instance_id, 0);
        }
    }

    fn host(&self) -> String {
        let fields = self.fields.load();
        fields
            .url
            .host_str()
            .map(|h| match fields.url.port() {
                Some(p) => format!("{h}:{p}"),
                None => h.to_string(),
            })
            .unwrap_or_else(|| fields.url.to_string())
    }
}
