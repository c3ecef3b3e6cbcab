// src/manager/mod.rs
use crate::backend::Backend;
use crate::health;
use crate::metrics::MetricsCollector;
use crate::registry::RegistryClient;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use futures::future::join_all;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};
use url::Url;

/// Owns the backend set and runs the two background loops: discovery
/// (reconciling against the registry) and health-checking (driving the
/// prober per backend). Request tasks only ever read `healthy_snapshot`.
pub struct BackendManager {
    backends: DashMap<String, Arc<Backend>>,
    // Cache of every known backend, refreshed on reconciliation. Kept so
    // `healthy_snapshot()` doesn't have to walk the DashMap on every
    // request; it is *not* where liveness filtering happens, since the
    // circuit breaker can flip `alive` between reconciliations and the
    // snapshot must reflect that the instant it happens (spec.md §8
    // property 6), not wait for the next discovery or health pass.
    all_cache: ArcSwap<Vec<Arc<Backend>>>,
    registry: Arc<dyn RegistryClient>,
    metrics: Arc<MetricsCollector>,
    health_client: Client,
    health_timeout: Duration,
    discovery_interval: Duration,
    health_interval: Duration,
    default_health_path: String,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BackendManager {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        metrics: Arc<MetricsCollector>,
        health_interval: Duration,
        health_timeout: Duration,
        default_health_path: String,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let health_client = Client::builder()
            .timeout(health_timeout)
            .build()
            .expect("failed to build health-check HTTP client");

        Arc::new(Self {
            backends: DashMap::new(),
            all_cache: ArcSwap::from_pointee(Vec::new()),
            registry,
            metrics,
            health_client,
            health_timeout,
            // Discovery runs at 2x the health-check cadence, per design.
            discovery_interval: health_interval * 2,
            health_interval,
            default_health_path,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Point-in-time list of references to backends whose `alive` flag is
    /// `true` right now. Filtering happens on every call (not just on the
    /// cached set refreshed at reconciliation) so a backend yanked by the
    /// circuit breaker between reconciliations is excluded immediately,
    /// not just after the next discovery or health pass. Callers may hold
    /// references past subsequent reconciliations.
    pub fn healthy_snapshot(&self) -> Vec<Arc<Backend>> {
        self.all_cache
            .load()
            .iter()
            .filter(|b| b.is_alive())
            .cloned()
            .collect()
    }

    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.backends.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_backend(&self, instance_id: &str) -> Option<Arc<Backend>> {
        self.backends.get(instance_id).map(|e| e.value().clone())
    }

    fn refresh_healthy_snapshot(&self) {
        let snapshot: Vec<Arc<Backend>> =
            self.backends.iter().map(|e| e.value().clone()).collect();
        self.all_cache.store(Arc::new(snapshot));
    }

    /// Drives both background loops until `shutdown()` is called. Meant to
    /// be spawned once at startup.
    pub async fn run(self: Arc<Self>) {
        let discovery = {
            let this = self.clone();
            tokio::spawn(async move { this.discovery_loop().await })
        };
        let health = {
            let this = self.clone();
            tokio::spawn(async move { this.health_loop().await })
        };

        let _ = tokio::join!(discovery, health);
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn discovery_loop(&self) {
        info!("starting backend discovery");
        self.discover().await;

        let mut ticker = interval(self.discovery_interval);
        ticker.tick().await; // consume the immediate first tick
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.discover().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("backend discovery stopped");
                        return;
                    }
                }
            }
        }
    }

    async fn discover(&self) {
        debug!("discovering backends from service registry");
        let services = match self.registry.get_services().await {
            Ok(services) => services,
            Err(err) => {
                // Transient registry failure: preserve the prior set.
                warn!(error = %err, "failed to fetch services from registry, keeping prior backend set");
                return;
            }
        };

        let mut seen = std::collections::HashSet::with_capacity(services.len());

        for entry in &services {
            let url: Url = match entry.url.parse() {
                Ok(u) => u,
                Err(err) => {
                    warn!(url = %entry.url, error = %err, "invalid backend URL from registry, skipping");
                    continue;
                }
            };
            let health_path = if entry.health_path.is_empty() {
                self.default_health_path.clone()
            } else {
                entry.health_path.clone()
            };

            seen.insert(entry.id.clone());

            if let Some(existing) = self.backends.get(&entry.id) {
                existing.value().refresh_fields(url, health_path);
            } else {
                let backend = Arc::new(Backend::new(
                    entry.id.clone(),
                    url.clone(),
                    health_path,
                    self.metrics.clone(),
                ));
                info!(backend_id = %entry.id, %url, "discovered new backend");
                self.backends.insert(entry.id.clone(), backend);
            }
        }

        // Anything previously known but absent from this fetch is
        // deregistered: remove it from the set. In-flight requests may
        // still hold a reference; this is set-removal, not destruction.
        let removed_ids: Vec<String> = self
            .backends
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| !seen.contains(id))
            .collect();

        for id in removed_ids {
            if let Some((_, backend)) = self.backends.remove(&id) {
                let host = backend
                    .url()
                    .host_str()
                    .map(|h| h.to_string())
                    .unwrap_or_default();
                info!(backend_id = %id, "backend removed (deregistered or no longer reported)");
                // Not object destruction: an in-flight request or a sticky
                // session mapping may still hold this Arc. Marking it dead
                // lets the sticky strategy's lazy revalidation purge it.
                backend.set_alive(false);
                self.metrics.clear_backend(&host, &id);
            }
        }

        self.refresh_healthy_snapshot();
        info!(count = self.backends.len(), "finished backend discovery");
    }

    async fn health_loop(&self) {
        info!(interval = ?self.health_interval, "starting backend health checks");
        let mut ticker = interval(self.health_interval);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all_backends().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health checks stopped");
                        return;
                    }
                }
            }
        }
    }

    async fn check_all_backends(&self) {
        let backends = self.all_backends();
        let timeout = self.health_timeout;
        let client = self.health_client.clone();

        let tasks = backends.into_iter().map(|backend| {
            let client = client.clone();
            async move {
                let url = backend.health_url();
                let healthy = health::check_http(&client, &url, timeout).await;
                let was_alive = backend.is_alive();

                if healthy && !was_alive {
                    info!(backend_id = %backend.instance_id, "backend is now healthy");
                    backend.set_alive(true);
                } else if !healthy && was_alive {
                    warn!(backend_id = %backend.instance_id, "backend is now unhealthy");
                    backend.set_alive(false);
                }
                // No change: no-op, no logging noise.
            }
        });

        join_all(tasks).await;
        // No cache refresh needed here: the backend set itself didn't
        // change, only `alive` flags, which `healthy_snapshot()` reads
        // live off each `Backend` rather than off the cached list.
    }
}
