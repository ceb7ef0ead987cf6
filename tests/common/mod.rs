//! Shared test utilities

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::Response;
use fleet_coordinator::api::{ApiServer, ApiServerBuilder};
use fleet_coordinator::nodes::{CommandEnvelope, NodeReply, SharedNodeRegistry, Transport};
use fleet_coordinator::{Error, EventBus, NodeRegistry, Result};

/// How the fake transport answers
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Ack,
    Nack,
    Hang,
}

/// Transport that never touches the network
pub struct FakeTransport {
    reply: Reply,
    calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn deliver(
        &self,
        _address: &str,
        envelope: &CommandEnvelope,
        _timeout: Duration,
    ) -> Result<NodeReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Reply::Ack => Ok(NodeReply {
                seq: envelope.seq,
                ok: true,
                payload: Some(serde_json::json!({"state": "on"})),
                error: None,
            }),
            Reply::Nack => Ok(NodeReply {
                seq: envelope.seq,
                ok: false,
                payload: None,
                error: Some("actuator jammed".to_string()),
            }),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::Transport("unreachable".to_string()))
            }
        }
    }
}

/// Coordinator wired to a fake transport
pub struct TestCoordinator {
    pub server: ApiServer,
    pub registry: SharedNodeRegistry,
    pub events: EventBus,
    pub transport: Arc<FakeTransport>,
    pub sweeper_running: Arc<AtomicBool>,
}

impl TestCoordinator {
    pub fn new(reply: Reply) -> Self {
        Self::with_options(reply, None)
    }

    pub fn with_options(reply: Reply, rate_limit: Option<u32>) -> Self {
        Self::with_limits(reply, rate_limit, 64)
    }

    pub fn with_limits(reply: Reply, rate_limit: Option<u32>, max_concurrent: usize) -> Self {
        let registry = NodeRegistry::shared();
        let events = EventBus::new(16);
        let transport = FakeTransport::new(reply);
        let sweeper_running = Arc::new(AtomicBool::new(true));

        let server = ApiServerBuilder::new(
            registry.clone(),
            events.clone(),
            transport.clone(),
            "ap-primary",
        )
        .command_timeout(Duration::from_millis(150))
        .rate_limit(rate_limit)
        .max_concurrent_requests(max_concurrent)
        .sweeper_running(sweeper_running.clone())
        .build();

        Self {
            server,
            registry,
            events,
            transport,
            sweeper_running,
        }
    }

    pub fn router(&self) -> axum::Router {
        self.server.router()
    }
}

/// JSON request without connection info
pub fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

/// JSON request as if it arrived from `peer`
pub fn json_request_from(
    peer: SocketAddr,
    method: &str,
    uri: &str,
    body: &serde_json::Value,
) -> Request<Body> {
    let mut request = json_request(method, uri, body);
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

/// GET request with an empty body
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

/// Read a response body as JSON
pub async fn read_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("body is JSON")
}
