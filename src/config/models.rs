// src/config/models.rs
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::time::Duration;

/// Top level configuration, loaded once at startup from a YAML or JSON file.
///
/// Field names follow the original load balancer's `camelCase` YAML keys so
/// existing config files continue to parse unchanged.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub port: u16,
    pub strategy: String,
    pub service_registry_url: String,
    pub service_registry_type: String,
    pub health_check_interval: String,
    pub health_check_timeout: String,
    #[serde(default = "default_health_path")]
    pub backend_health_path: String,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_health_path() -> String {
    "/health".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategyKind {
    RoundRobin,
    LeastConnections,
    StickySessions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryTransport {
    Http,
    Grpc,
}

impl Config {
    /// Parse and range-check every field that the raw YAML/JSON can't
    /// validate on its own; fails fast at startup rather than surfacing a
    /// confusing error later in a background loop.
    pub fn validate(&self) -> Result<()> {
        self.strategy_kind()?;
        self.registry_transport()?;
        self.health_check_interval()?;
        self.health_check_timeout()?;
        if self.port == 0 {
            return Err(anyhow!("port must be non-zero"));
        }
        Ok(())
    }

    pub fn strategy_kind(&self) -> Result<SelectionStrategyKind> {
        match self.strategy.as_str() {
            "round_robin" => Ok(SelectionStrategyKind::RoundRobin),
            "least_connections" => Ok(SelectionStrategyKind::LeastConnections),
            "sticky_sessions" => Ok(SelectionStrategyKind::StickySessions),
            other => Err(anyhow!("unsupported load balancing strategy: {other}")),
        }
    }

    pub fn registry_transport(&self) -> Result<RegistryTransport> {
        match self.service_registry_type.to_lowercase().as_str() {
            "http" => Ok(RegistryTransport::Http),
            "grpc" => Ok(RegistryTransport::Grpc),
            other => Err(anyhow!("unsupported service registry type: {other}")),
        }
    }

    pub fn health_check_interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.health_check_interval)
            .map_err(|e| anyhow!("invalid healthCheckInterval {:?}: {e}", self.health_check_interval))
    }

    pub fn health_check_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.health_check_timeout)
            .map_err(|e| anyhow!("invalid healthCheckTimeout {:?}: {e}", self.health_check_timeout))
    }
}
