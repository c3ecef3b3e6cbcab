// ────────────────────────────────
// src/proxy/reverse_proxy.rs
// Single-host reverse proxy: selects a backend per request and forwards.
// ────────────────────────────────

use crate::backend::Backend;
use crate::metrics::MetricsCollector;
use crate::strategy::SelectionStrategy;
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, COOKIE, SET_COOKIE};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info_span};

pub struct Proxy {
    strategy: Arc<dyn SelectionStrategy>,
    client: Client<HttpConnector>,
    metrics: Arc<MetricsCollector>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream transport error: {0}")]
    UpstreamError(#[from] hyper::Error),

    #[error("invalid upstream URI: {0}")]
    InvalidUri(#[from] hyper::http::Error),

    #[error("invalid upstream URI component: {0}")]
    InvalidUriPart(#[from] hyper::http::uri::InvalidUri),
}

/// Ensures the per-request connection counter is always balanced, even if
/// a future branch returns early — the increment in `Proxy::handle` is
/// undone exactly once, on every exit path.
struct ConnectionGuard<'a>(&'a Backend);

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.0.decrement_connections();
    }
}

impl Proxy {
    pub fn new(strategy: Arc<dyn SelectionStrategy>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            strategy,
            client: Client::new(),
            metrics,
        }
    }

    pub async fn handle(&self, req: Request<Body>, remote_addr: SocketAddr) -> Response<Body> {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let strategy_name = self.strategy.name();

        let span = info_span!("request", strategy = strategy_name, backend_id = tracing::field::Empty);
        let _enter = span.enter();

        let session_cookie = read_session_cookie(&req);
        let selection = self.strategy.select(session_cookie.as_deref());

        let Some(backend) = selection.backend else {
            let response = respond(StatusCode::SERVICE_UNAVAILABLE, "No healthy backend available");
            self.record(&path, &method, response.status(), "none", strategy_name, start);
            return response;
        };

        span.record("backend_id", backend.instance_id.as_str());

        backend.increment_connections();
        let _guard = ConnectionGuard(&backend);

        let mut response = match self.forward(req, &backend, remote_addr).await {
            Ok(response) => response,
            Err(err) => {
                error!(backend_id = %backend.instance_id, error = %err, "proxy error forwarding request");
                backend.record_error();
                respond(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        };

        if let Some(cookie) = &selection.new_session_cookie {
            if let Ok(value) = HeaderValue::from_str(&session_cookie_header(cookie)) {
                response.headers_mut().insert(SET_COOKIE, value);
            }
        }

        self.record(
            &path,
            &method,
            response.status(),
            &backend.instance_id,
            strategy_name,
            start,
        );
        response
    }

    async fn forward(
        &self,
        mut req: Request<Body>,
        backend: &Backend,
        remote_addr: SocketAddr,
    ) -> Result<Response<Body>, ProxyError> {
        let target = build_upstream_uri(&backend.url(), req.uri())?;
        *req.uri_mut() = target;

        if !req.headers().contains_key("x-forwarded-for") {
            let client_ip = remote_addr.ip().to_string();
            if let Ok(value) = HeaderValue::from_str(&client_ip) {
                req.headers_mut().insert("x-forwarded-for", value);
            }
        }

        Ok(self.client.request(req).await?)
    }

    fn record(
        &self,
        path: &str,
        method: &str,
        status: StatusCode,
        backend_id: &str,
        strategy: &str,
        start: Instant,
    ) {
        self.metrics
            .record_request(path, method, status.as_u16(), backend_id, strategy, start.elapsed());
    }
}

fn build_upstream_uri(backend_url: &url::Url, original: &Uri) -> Result<Uri, ProxyError> {
    let mut parts = hyper::http::uri::Parts::default();
    parts.scheme = Some(backend_url.scheme().parse()?);
    let authority = format!(
        "{}{}",
        backend_url.host_str().unwrap_or("localhost"),
        backend_url
            .port()
            .map(|p| format!(":{p}"))
            .unwrap_or_default()
    );
    parts.authority = Some(authority.parse()?);
    parts.path_and_query = original.path_and_query().cloned();
    Uri::from_parts(parts).map_err(|e| ProxyError::InvalidUri(e.into()))
}

fn respond(status: StatusCode, message: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(message))
        .expect("building a static error response never fails")
}

fn read_session_cookie(req: &Request<Body>) -> Option<String> {
    let header = req.headers().get(COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "SESSIONID").then(|| value.to_string())
    })
}

fn session_cookie_header(value: &str) -> String {
    format!("SESSIONID={value}; Path=/; Max-Age=86400")
}
