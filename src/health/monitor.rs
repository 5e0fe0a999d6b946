//! Active health monitor.
//!
//! Probes every backend of the pool in order, records the result, sleeps,
//! and starts over until shutdown.

use crate::backend::Backend;
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{ProxyBody, UpstreamClient};
use crate::state::PoolState;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::http::uri::{Scheme, Uri};
use hyper::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Periodically probes backends and records their health.
pub struct HealthMonitor {
    /// Backends in pool order.
    pool: Arc<[Backend]>,
    /// Health state to update.
    state: Arc<PoolState>,
    /// Client used for probes.
    client: UpstreamClient,
    /// `http` or `https`.
    scheme: Scheme,
    /// Path probed on every backend.
    path: String,
    /// Bound for each probe.
    probe_timeout: Duration,
    /// Pause between two full passes.
    interval: Duration,
    /// Metrics collector.
    metrics: MetricsCollector,
}

impl HealthMonitor {
    /// Create a health monitor probing `pool` on the schedule in `config`.
    pub fn new(
        pool: Arc<[Backend]>,
        state: Arc<PoolState>,
        client: UpstreamClient,
        scheme: Scheme,
        config: &HealthCheckConfig,
        probe_timeout: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            pool,
            state,
            client,
            scheme,
            path: config.path.clone(),
            probe_timeout,
            interval: config.interval,
            metrics,
        }
    }

    /// Run probe passes until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            backends = self.pool.len(),
            interval_ms = self.interval.as_millis(),
            path = %self.path,
            "health monitor starting"
        );

        loop {
            tokio::select! {
                _ = self.pass_then_sleep() => {}

                _ = shutdown.recv() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }

    async fn pass_then_sleep(&self) {
        self.check_all().await;
        tokio::time::sleep(self.interval).await;
    }

    /// Probe every backend once, in pool order, recording each result as
    /// soon as it is known.
    pub async fn check_all(&self) {
        for backend in self.pool.iter() {
            let healthy = probe(
                &self.client,
                &self.scheme,
                backend,
                &self.path,
                self.probe_timeout,
            )
            .await;
            self.record(backend, healthy);
        }
    }

    fn record(&self, backend: &Backend, healthy: bool) {
        let previous = self.state.set_healthy(backend, healthy);

        self.metrics.record_health_check(backend.as_str(), healthy);
        self.metrics.set_backend_health(backend.as_str(), healthy);

        match (previous, healthy) {
            (Some(true), false) => warn!(backend = %backend, "backend became unhealthy"),
            (Some(false), true) => info!(backend = %backend, "backend became healthy"),
            (None, true) => info!(backend = %backend, "backend is healthy"),
            (None, false) => warn!(backend = %backend, "backend is unhealthy"),
            _ => debug!(backend = %backend, healthy, "health check result"),
        }
    }
}

/// Probe one backend.
///
/// Healthy only when a response arrives within `probe_timeout` with status
/// exactly 200. Any error, other status, or timeout is unhealthy.
pub async fn probe(
    client: &UpstreamClient,
    scheme: &Scheme,
    backend: &Backend,
    path: &str,
    probe_timeout: Duration,
) -> bool {
    let uri = match Uri::builder()
        .scheme(scheme.clone())
        .authority(backend.as_str())
        .path_and_query(path)
        .build()
    {
        Ok(uri) => uri,
        Err(e) => {
            warn!(backend = %backend, error = %e, "invalid health check URI");
            return false;
        }
    };

    let body: ProxyBody = Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync();
    let req = match Request::get(uri).body(body) {
        Ok(req) => req,
        Err(e) => {
            warn!(backend = %backend, error = %e, "failed to build health check request");
            return false;
        }
    };

    match timeout(probe_timeout, client.request(req)).await {
        Ok(Ok(response)) => {
            let status = response.status();
            if status != StatusCode::OK {
                debug!(
                    backend = %backend,
                    status = status.as_u16(),
                    "unexpected health status"
                );
            }
            status == StatusCode::OK
        }
        Ok(Err(e)) => {
            debug!(backend = %backend, error = %e, "health check request failed");
            false
        }
        Err(_) => {
            debug!(
                backend = %backend,
                timeout_ms = probe_timeout.as_millis(),
                "health check timed out"
            );
            false
        }
    }
}
