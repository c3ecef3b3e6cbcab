// tests/load_balancer_tests.rs
use dynamic_lb::backend::Backend;
use dynamic_lb::metrics::MetricsRegistry;
use dynamic_lb::proxy::Proxy;
use dynamic_lb::strategy::{BackendProvider, RoundRobinStrategy, StickySessionsStrategy};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use url::Url;

/// Spins up a real HTTP server that stamps every response with its
/// `backend_id` so tests can observe which backend actually served a
/// forwarded request.
async fn spawn_backend(id: &'static str) -> SocketAddr {
    let make_svc = make_service_fn(move |_| async move {
        Ok::<_, hyper::Error>(service_fn(move |_req: Request<Body>| async move {
            Ok::<_, hyper::Error>(Response::new(Body::from(id)))
        }))
    });

    let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

fn backend_for(id: &str, addr: SocketAddr, metrics: Arc<dynamic_lb::metrics::MetricsCollector>) -> Arc<Backend> {
    let url = Url::parse(&format!("http://{addr}")).unwrap();
    let backend = Backend::new(id.to_string(), url, "/health".to_string(), metrics);
    backend.set_alive(true);
    Arc::new(backend)
}

struct FixedProvider(RwLock<Vec<Arc<Backend>>>);

impl BackendProvider for FixedProvider {
    fn healthy_snapshot(&self) -> Vec<Arc<Backend>> {
        self.0.read().unwrap().clone()
    }
}

fn request(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn request_with_cookie(path: &str, session_id: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(hyper::header::COOKIE, format!("SESSIONID={session_id}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn client_addr() -> SocketAddr {
    ([203, 0, 113, 7], 5555).into()
}

// S1: round_robin over A, B sends 4 requests in order A, B, A, B.
#[tokio::test]
async fn round_robin_alternates_upstream_delivery() {
    let metrics = MetricsRegistry::new().unwrap().collector();
    let a = backend_for("a", spawn_backend("a").await, metrics.clone());
    let b = backend_for("b", spawn_backend("b").await, metrics.clone());

    let provider = Arc::new(FixedProvider(RwLock::new(vec![a, b])));
    let strategy = Arc::new(RoundRobinStrategy::new(provider));
    let proxy = Proxy::new(strategy, metrics);

    let mut order = Vec::new();
    for _ in 0..4 {
        let response = proxy.handle(request("/x"), client_addr()).await;
        order.push(body_text(response).await);
    }

    assert_eq!(order, vec!["a", "b", "a", "b"]);
}

// S3: sticky_sessions issues a cookie on the first request, honors it on
// the second, then reroutes once the sticky backend goes unhealthy.
#[tokio::test]
async fn sticky_sessions_issues_cookie_and_reroutes_on_failure() {
    let metrics = MetricsRegistry::new().unwrap().collector();
    let a = backend_for("a", spawn_backend("a").await, metrics.clone());
    let b = backend_for("b", spawn_backend("b").await, metrics.clone());

    let provider = Arc::new(FixedProvider(RwLock::new(vec![a.clone()])));
    let strategy = Arc::new(StickySessionsStrategy::new(provider.clone()));
    let proxy = Proxy::new(strategy, metrics);

    let first = proxy.handle(request("/"), client_addr()).await;
    let cookie = first
        .headers()
        .get(hyper::header::SET_COOKIE)
        .expect("first response should set a session cookie")
        .to_str()
        .unwrap()
        .to_string();
    let session_id = cookie
        .split(';')
        .next()
        .unwrap()
        .trim_start_matches("SESSIONID=")
        .to_string();
    assert_eq!(body_text(first).await, "a");

    let second = proxy
        .handle(request_with_cookie("/", &session_id), client_addr())
        .await;
    assert_eq!(body_text(second).await, "a");

    a.set_alive(false);
    *provider.0.write().unwrap() = vec![b];

    let third = proxy
        .handle(request_with_cookie("/", &session_id), client_addr())
        .await;
    assert_eq!(body_text(third).await, "b");
}

// S4: an empty healthy set returns 503 for any request.
#[tokio::test]
async fn empty_backend_set_returns_service_unavailable() {
    let metrics = MetricsRegistry::new().unwrap().collector();
    let provider = Arc::new(FixedProvider(RwLock::new(Vec::new())));
    let strategy = Arc::new(RoundRobinStrategy::new(provider));
    let proxy = Proxy::new(strategy, metrics);

    let response = proxy.handle(request("/"), client_addr()).await;
    assert_eq!(response.status(), hyper::StatusCode::SERVICE_UNAVAILABLE);
}
