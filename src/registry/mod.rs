// src/registry/mod.rs
mod grpc;
mod http;

pub use grpc::GrpcRegistryClient;
pub use http::HttpRegistryClient;

use crate::config::RegistryTransport;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// One entry of the registry's authoritative service list.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    pub id: String,
    pub url: String,
    #[serde(rename = "healthPath", alias = "health_path")]
    pub health_path: String,
}

/// The one capability the Backend Manager needs from a registry, regardless
/// of transport.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn get_services(&self) -> Result<Vec<ServiceEntry>>;
}

/// Construct the configured transport. Dispatch is by case-insensitive tag,
/// matching the config's `serviceRegistryType` field.
pub async fn build_registry_client(
    transport: RegistryTransport,
    address: &str,
) -> Result<Arc<dyn RegistryClient>> {
    match transport {
        RegistryTransport::Http => Ok(Arc::new(HttpRegistryClient::new(address))),
        RegistryTransport::Grpc => {
            let client = GrpcRegistryClient::connect(address).await?;
            Ok(Arc::new(client))
        }
    }
}
