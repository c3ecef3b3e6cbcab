// src/registry/grpc.rs
use super::{RegistryClient, ServiceEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::Channel;
use tracing::info;

mod proto {
    tonic::include_proto!("registry");
}

use proto::service_registry_client::ServiceRegistryClient;
use proto::GetHealthyServicesRequest;

/// Fetches the service list over a unary gRPC call, `GetHealthyServices`,
/// on a plaintext channel (no TLS certificates to manage for this
/// deployment's internal registry traffic).
pub struct GrpcRegistryClient {
    client: ServiceRegistryClient<Channel>,
}

impl GrpcRegistryClient {
    pub async fn connect(address: &str) -> Result<Self> {
        let endpoint_addr = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let channel = Channel::from_shared(endpoint_addr.clone())
            .with_context(|| format!("invalid gRPC registry address: {endpoint_addr}"))?
            .connect()
            .await
            .with_context(|| format!("failed to connect to gRPC registry at {endpoint_addr}"))?;

        Ok(Self {
            client: ServiceRegistryClient::new(channel),
        })
    }
}

#[async_trait]
impl RegistryClient for GrpcRegistryClient {
    async fn get_services(&self) -> Result<Vec<ServiceEntry>> {
        let mut client = self.client.clone();

        let mut request = tonic::Request::new(GetHealthyServicesRequest {});
        request.set_timeout(Duration::from_secs(5));

        let response = client
            .get_healthy_services(request)
            .await
            .context("gRPC call to get healthy services failed")?;

        Ok(response
            .into_inner()
            .services
            .into_iter()
            .map(|s| ServiceEntry {
                id: s.id,
                url: s.url,
                health_path: s.health_path,
            })
            .collect())
    }
}

impl Drop for GrpcRegistryClient {
    fn drop(&mut self) {
        info!("closing gRPC registry client connection");
    }
}
