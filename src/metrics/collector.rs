//! Metrics collector using prometheus-client.
//!
//! Provides metrics for request counts, latency, per-backend traffic and
//! backend health.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Backend label used when a request never reached a backend.
pub const NO_BACKEND: &str = "none";

/// Labels for request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub backend: String,
    pub method: String,
    pub status: String,
}

/// Labels for per-backend metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

/// Labels for health check metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealthCheckLabels {
    pub backend: String,
    pub result: HealthCheckResult,
}

/// Result of a health check.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HealthCheckResult {
    Success,
    Failure,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Total requests counter.
    requests_total: Family<RequestLabels, Counter>,
    /// Request duration histogram (in seconds), up to response headers.
    request_duration_seconds: Family<BackendLabels, Histogram>,
    /// Response bytes copied per backend.
    backend_bytes_total: Family<BackendLabels, Counter>,
    /// Backend health gauge (1 = healthy, 0 = unhealthy).
    backend_health: Family<BackendLabels, Gauge>,
    /// Health check results counter.
    health_checks_total: Family<HealthCheckLabels, Counter>,
    /// Open client connections.
    active_connections: Gauge,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        let request_duration_seconds =
            Family::<BackendLabels, Histogram>::new_with_constructor(|| {
                // Buckets: 1ms, 2.5ms, 6.25ms, ... ~15s
                Histogram::new(exponential_buckets(0.001, 2.5, 13))
            });
        let backend_bytes_total = Family::<BackendLabels, Counter>::default();
        let backend_health = Family::<BackendLabels, Gauge>::default();
        let health_checks_total = Family::<HealthCheckLabels, Counter>::default();
        let active_connections = Gauge::default();

        registry.register(
            "trafficlb_requests",
            "Total number of requests processed",
            requests_total.clone(),
        );
        registry.register(
            "trafficlb_request_duration_seconds",
            "Time until backend response headers, in seconds",
            request_duration_seconds.clone(),
        );
        registry.register(
            "trafficlb_backend_bytes",
            "Response bytes forwarded from each backend",
            backend_bytes_total.clone(),
        );
        registry.register(
            "trafficlb_backend_health",
            "Backend health status (1=healthy, 0=unhealthy)",
            backend_health.clone(),
        );
        registry.register(
            "trafficlb_health_checks",
            "Total number of health checks performed",
            health_checks_total.clone(),
        );
        registry.register(
            "trafficlb_active_connections",
            "Number of open client connections",
            active_connections.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                requests_total,
                request_duration_seconds,
                backend_bytes_total,
                backend_health,
                health_checks_total,
                active_connections,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record a request outcome.
    pub fn record_request(&self, backend: &str, method: &str, status: u16, duration: Duration) {
        let labels = RequestLabels {
            backend: backend.to_string(),
            method: method.to_string(),
            status: status.to_string(),
        };
        self.inner.requests_total.get_or_create(&labels).inc();

        let backend_labels = BackendLabels {
            backend: backend.to_string(),
        };
        self.inner
            .request_duration_seconds
            .get_or_create(&backend_labels)
            .observe(duration.as_secs_f64());
    }

    /// Record response bytes copied from a backend.
    pub fn record_bytes(&self, backend: &str, bytes: u64) {
        let labels = BackendLabels {
            backend: backend.to_string(),
        };
        self.inner
            .backend_bytes_total
            .get_or_create(&labels)
            .inc_by(bytes);
    }

    /// Update backend health status.
    pub fn set_backend_health(&self, backend: &str, healthy: bool) {
        let labels = BackendLabels {
            backend: backend.to_string(),
        };
        self.inner
            .backend_health
            .get_or_create(&labels)
            .set(if healthy { 1 } else { 0 });
    }

    /// Record a health check result.
    pub fn record_health_check(&self, backend: &str, success: bool) {
        let labels = HealthCheckLabels {
            backend: backend.to_string(),
            result: if success {
                HealthCheckResult::Success
            } else {
                HealthCheckResult::Failure
            },
        };
        self.inner.health_checks_total.get_or_create(&labels).inc();
    }

    /// Increment open connections.
    pub fn connection_opened(&self) {
        self.inner.active_connections.inc();
    }

    /// Decrement open connections.
    pub fn connection_closed(&self) {
        self.inner.active_connections.dec();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
