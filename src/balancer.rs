//! The load balancer: pool, shared state, forwarding and health monitoring.

use crate::backend::{Backend, LeastTraffic};
use crate::config::{Config, HealthCheckConfig};
use crate::health::HealthMonitor;
use crate::metrics::MetricsCollector;
use crate::proxy::{build_client, BoxError, Forwarder, ProxyBody, UpstreamClient};
use crate::state::PoolState;
use bytes::Bytes;
use hyper::body::Body;
use hyper::{Request, Response};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Errors that can occur while building a balancer.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("backend pool cannot be empty")]
    EmptyPool,

    #[error("failed to set up TLS for upstream connections: {0}")]
    Tls(#[from] rustls::Error),
}

/// A least-traffic reverse proxy over a fixed backend pool.
///
/// Each balancer owns its own health and traffic state, so several can run
/// side by side in one process.
pub struct Balancer {
    selector: LeastTraffic,
    state: Arc<PoolState>,
    forwarder: Forwarder,
    client: UpstreamClient,
    health_check: HealthCheckConfig,
    timeout: Duration,
    metrics: MetricsCollector,
}

impl Balancer {
    /// Build a balancer from configuration. Every backend starts unhealthy
    /// until the health monitor has probed it.
    pub fn new(config: &Config, metrics: MetricsCollector) -> Result<Self, BalancerError> {
        if config.backends.is_empty() {
            return Err(BalancerError::EmptyPool);
        }

        let state = Arc::new(PoolState::new());
        let client = build_client()?;

        let forwarder = Forwarder::new(
            client.clone(),
            config.balancer.https,
            config.balancer.timeout,
            config.balancer.trace,
            Arc::clone(&state),
            metrics.clone(),
        );

        Ok(Self {
            selector: LeastTraffic::new(config.backends.clone(), Arc::clone(&state)),
            state,
            forwarder,
            client,
            health_check: config.health_check.clone(),
            timeout: config.balancer.timeout,
            metrics,
        })
    }

    /// The backends in pool order.
    pub fn pool(&self) -> &[Backend] {
        self.selector.pool()
    }

    /// Shared health and traffic state.
    pub fn state(&self) -> &Arc<PoolState> {
        &self.state
    }

    /// Pick the healthy backend with the least traffic, if any.
    pub fn select(&self) -> Option<Backend> {
        self.selector.select()
    }

    /// Select a backend and proxy the request to it.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let target = self.select();
        self.forwarder.forward(req, target).await
    }

    /// Build a health monitor over this balancer's pool and state.
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            Arc::from(self.pool()),
            Arc::clone(&self.state),
            self.client.clone(),
            self.forwarder.scheme().clone(),
            &self.health_check,
            self.timeout,
            self.metrics.clone(),
        )
    }

    /// Spawn the health monitor. It runs until `shutdown` fires; await the
    /// returned handle to wait for it to stop.
    pub fn start_health_monitor(&self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.health_monitor().run(shutdown))
    }
}
