// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Owns the Prometheus registry and exposes the text encoding for
/// `GET /metrics`.
pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new_registered(&registry)?);
        Ok(Self { registry, collector })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        buffer
    }
}

/// The four required series plus their labels, exactly as specified:
///
/// - `loadbalancer_request_duration_seconds{path,method,status,backend_id,strategy}`
/// - `loadbalancer_total_requests{path,method,status,backend_id,strategy}`
/// - `loadbalancer_backend_status{backend_host,backend_id}`
/// - `loadbalancer_backend_active_connections{backend_host,backend_id}`
#[derive(Debug)]
pub struct MetricsCollector {
    request_duration_seconds: HistogramVec,
    total_requests: IntCounterVec,
    backend_status: GaugeVec,
    backend_active_connections: GaugeVec,
}

impl MetricsCollector {
    fn new_registered(registry: &Registry) -> Result<Self> {
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "loadbalancer_request_duration_seconds",
                "Duration of HTTP requests through the load balancer",
            ),
            &["path", "method", "status", "backend_id", "strategy"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let total_requests = IntCounterVec::new(
            Opts::new(
                "loadbalancer_total_requests",
                "Total number of requests processed by the load balancer",
            ),
            &["path", "method", "status", "backend_id", "strategy"],
        )?;
        registry.register(Box::new(total_requests.clone()))?;

        let backend_status = GaugeVec::new(
            Opts::new(
                "loadbalancer_backend_status",
                "Current health status of backend services (0=unhealthy, 1=healthy)",
            ),
            &["backend_host", "backend_id"],
        )?;
        registry.register(Box::new(backend_status.clone()))?;

        let backend_active_connections = GaugeVec::new(
            Opts::new(
                "loadbalancer_backend_active_connections",
                "Number of active connections to each backend service",
            ),
            &["backend_host", "backend_id"],
        )?;
        registry.register(Box::new(backend_active_connections.clone()))?;

        Ok(Self {
            request_duration_seconds,
            total_requests,
            backend_status,
            backend_active_connections,
        })
    }

    /// Test-only constructor: a private, unregistered registry so backend
    /// unit tests can publish gauges without a `MetricsRegistry`.
    #[cfg(test)]
    pub fn new() -> Result<Self> {
        Self::new_registered(&Registry::new())
    }

    pub fn record_request(
        &self,
        path: &str,
        method: &str,
        status: u16,
        backend_id: &str,
        strategy: &str,
        duration: Duration,
    ) {
        let status = status.to_string();
        let labels = [path, method, status.as_str(), backend_id, strategy];
        self.total_requests.with_label_values(&labels).inc();
        self.request_duration_seconds
            .with_label_values(&labels)
            .observe(duration.as_secs_f64());
    }

    pub fn update_backend_status(&self, backend_host: &str, backend_id: &str, healthy: bool) {
        self.backend_status
            .with_label_values(&[backend_host, backend_id])
            .set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn update_backend_connections(&self, backend_host: &str, backend_id: &str, count: i64) {
        self.backend_active_connections
            .with_label_values(&[backend_host, backend_id])
            .set(count as f64);
    }

    /// Called by the discovery loop when a backend is removed from the
    /// registry's authoritative list: zeroes its exported gauges so a
    /// deregistered instance doesn't linger at its last observed value.
    pub fn clear_backend(&self, backend_host: &str, backend_id: &str) {
        self.update_backend_status(backend_host, backend_id, false);
        self.update_backend_connections(backend_host, backend_id, 0);
    }
}
