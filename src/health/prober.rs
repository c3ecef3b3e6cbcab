// src/health/prober.rs
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Issues one HTTP GET against `url` with `timeout`. Returns `true` iff the
/// response arrives in time and its status is exactly 200 — connection
/// failure, non-200, and timeout all yield `false`. No retries: the
/// caller's loop is the retry.
pub async fn check_http(client: &Client, url: &Url, timeout: Duration) -> bool {
    let probe = async {
        let response = client.get(url.as_str()).send().await?;
        let healthy = response.status() == reqwest::StatusCode::OK;
        // Drain (or the connection would leak); discard the body either way.
        let _ = response.bytes().await;
        Ok::<bool, reqwest::Error>(healthy)
    };

    match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(healthy)) => healthy,
        Ok(Err(err)) => {
            tracing::debug!(%url, error = %err, "health probe connection failed");
            false
        }
        Err(_) => {
            tracing::debug!(%url, "health probe timed out");
            false
        }
    }
}
