// src/registry/http.rs
use super::{RegistryClient, ServiceEntry};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Fetches the service list over plain HTTP: `GET {base}/api/v1/services`.
pub struct HttpRegistryClient {
    base_url: String,
    client: Client,
}

impl HttpRegistryClient {
    pub fn new(address: &str) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP registry client");

        Self { base_url, client }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get_services(&self) -> Result<Vec<ServiceEntry>> {
        let url = format!("{}/api/v1/services", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to connect to HTTP service registry at {url}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "HTTP service registry returned non-OK status: {status}, body: {body}"
            ));
        }

        response
            .json::<Vec<ServiceEntry>>()
            .await
            .context("failed to decode service list from HTTP registry")
    }
}
