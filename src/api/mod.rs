//! HTTP API server for the fleet coordinator

pub mod health;
pub mod heartbeat;
pub mod monitor;
pub mod nodes;
pub mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, watch};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::events::EventBus;
use crate::nodes::{
    CommandDispatcher, HeartbeatReceiver, SensorSink, SharedNodeRegistry, Transport,
};
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: SharedNodeRegistry,
    pub receiver: HeartbeatReceiver,
    pub dispatcher: CommandDispatcher,
    pub identity: String,
    pub sweeper_running: Arc<AtomicBool>,
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
}

/// Builder for the API server
pub struct ApiServerBuilder {
    registry: SharedNodeRegistry,
    events: EventBus,
    transport: Arc<dyn Transport>,
    addr: SocketAddr,
    identity: String,
    command_timeout: Duration,
    max_concurrent_requests: usize,
    rate_limit_per_minute: Option<u32>,
    sweeper_running: Arc<AtomicBool>,
    sensor_sink: Option<Arc<dyn SensorSink>>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(
        registry: SharedNodeRegistry,
        events: EventBus,
        transport: Arc<dyn Transport>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            events,
            transport,
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            identity: identity.into(),
            command_timeout: Duration::from_secs(5),
            max_concurrent_requests: 64,
            rate_limit_per_minute: None,
            sweeper_running: Arc::new(AtomicBool::new(false)),
            sensor_sink: None,
        }
    }

    /// Address to listen on
    #[must_use]
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Deadline for each dispatched command
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Bound on concurrently handled requests
    #[must_use]
    pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit;
        self
    }

    /// Global requests-per-minute budget
    #[must_use]
    pub fn rate_limit(mut self, requests_per_minute: Option<u32>) -> Self {
        self.rate_limit_per_minute = requests_per_minute;
        self
    }

    /// Flag reporting whether the liveness sweeper is running, for readiness
    #[must_use]
    pub fn sweeper_running(mut self, flag: Arc<AtomicBool>) -> Self {
        self.sweeper_running = flag;
        self
    }

    /// Destination for sensor readings carried on heartbeats
    #[must_use]
    pub fn sensor_sink(mut self, sink: Arc<dyn SensorSink>) -> Self {
        self.sensor_sink = Some(sink);
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let mut receiver = HeartbeatReceiver::new(self.registry.clone(), self.events);
        if let Some(sink) = self.sensor_sink {
            receiver = receiver.with_sink(sink);
        }

        let dispatcher =
            CommandDispatcher::new(self.registry.clone(), self.transport, self.command_timeout);

        let rate_limiter = self.rate_limit_per_minute.map(rate_limit::create_limiter);

        let state = Arc::new(ApiState {
            registry: self.registry,
            receiver,
            dispatcher,
            identity: self.identity,
            sweeper_running: self.sweeper_running,
            rate_limiter,
        });

        let max_concurrent_requests = self.max_concurrent_requests.max(1);
        ApiServer {
            state,
            addr: self.addr,
            max_concurrent_requests,
            request_permits: Arc::new(Semaphore::new(max_concurrent_requests)),
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    addr: SocketAddr,
    max_concurrent_requests: usize,
    /// One permit per in-flight request, shared by every route
    request_permits: Arc<Semaphore>,
}

impl ApiServer {
    /// Shared handler state
    #[must_use]
    pub fn state(&self) -> Arc<ApiState> {
        self.state.clone()
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let router = Router::new()
            .nest("/api/nodes", nodes::router(self.state.clone()))
            .merge(nodes::commands_router(self.state.clone()))
            .merge(heartbeat::router(self.state.clone()))
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        // Rate limiting (only when a budget is configured)
        let router = router.layer(axum::middleware::from_fn_with_state(
            self.state.clone(),
            rate_limit::rate_limit_middleware,
        ));

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router
            .layer(GlobalConcurrencyLimitLayer::with_semaphore(
                self.request_permits.clone(),
            ))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` flips, then drain in-flight requests
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(
            addr = %self.addr,
            identity = %self.state.identity,
            max_concurrent_requests = self.max_concurrent_requests,
            rate_limited = self.state.rate_limiter.is_some(),
            "API server listening"
        );

        let app = self.router();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
