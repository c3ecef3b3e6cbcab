// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Service;

use crate::proxy::Proxy;
use crate::server::builder::WithPeer;

/// Wraps the proxy as a `tower::Service` so it plugs into `ServerBuilder`.
/// Per-connection, `for_peer` stamps in the remote address the proxy needs
/// for `X-Forwarded-For`.
#[derive(Clone)]
pub struct RequestHandler {
    proxy: Arc<Proxy>,
    peer: SocketAddr,
}

impl RequestHandler {
    pub fn new(proxy: Arc<Proxy>) -> Self {
        Self {
            proxy,
            peer: ([0, 0, 0, 0], 0).into(),
        }
    }

    pub fn for_peer(&self, peer: SocketAddr) -> Self {
        Self {
            proxy: self.proxy.clone(),
            peer,
        }
    }
}

impl WithPeer for RequestHandler {
    fn for_peer(&self, peer: SocketAddr) -> Self {
        RequestHandler::for_peer(self, peer)
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let proxy = self.proxy.clone();
        let peer = self.peer;
        Box::pin(async move { Ok(proxy.handle(req, peer).await) })
    }
}
