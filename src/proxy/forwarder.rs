//! Forwards one request to a backend and streams the response back.

use crate::backend::Backend;
use crate::metrics::{MetricsCollector, NO_BACKEND};
use crate::proxy::{BoxError, CountingBody, ProxyBody, UpstreamClient};
use crate::state::PoolState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, HOST};
use hyper::http::uri::{PathAndQuery, Scheme, Uri};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

/// Response header naming the backend that served the request.
pub const TRACE_HEADER: HeaderName = HeaderName::from_static("lb-from");

/// Reasons a request could not be forwarded.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("no healthy backend available")]
    NoHealthyBackend,

    #[error("invalid upstream URI: {0}")]
    InvalidUri(#[from] hyper::http::Error),

    #[error("invalid backend address in Host header: {0}")]
    InvalidHost(#[from] hyper::header::InvalidHeaderValue),

    #[error("backend request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    /// Status returned to the caller for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::NoHealthyBackend => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Plain-text body returned to the caller for this error.
    fn message(&self) -> &'static str {
        match self {
            ForwardError::NoHealthyBackend => "No healthy servers",
            _ => "Bad gateway",
        }
    }
}

/// Forwards requests to backends and accounts for the bytes copied back.
#[derive(Clone)]
pub struct Forwarder {
    /// Upstream HTTP client.
    client: UpstreamClient,
    /// `http` or `https`.
    scheme: Scheme,
    /// Upper bound for the whole exchange, body included.
    timeout: Duration,
    /// Whether to add the `lb-from` header.
    trace: bool,
    /// Traffic counters updated after each response.
    state: Arc<PoolState>,
    /// Metrics collector.
    metrics: MetricsCollector,
}

impl Forwarder {
    /// Create a new forwarder.
    pub fn new(
        client: UpstreamClient,
        https: bool,
        timeout: Duration,
        trace: bool,
        state: Arc<PoolState>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            client,
            scheme: if https { Scheme::HTTPS } else { Scheme::HTTP },
            timeout,
            trace,
            state,
            metrics,
        }
    }

    /// Scheme used to reach backends.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Proxy `req` to `target`.
    ///
    /// Never fails: errors are turned into a 503 when there is no target
    /// and a 502 when the backend cannot be reached in time.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        target: Option<Backend>,
    ) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let start_time = Instant::now();
        let method = req.method().clone();
        let uri = req.uri().clone();

        let Some(backend) = target else {
            let err = ForwardError::NoHealthyBackend;
            warn!(method = %method, uri = %uri, "{}", err);
            self.metrics.record_request(
                NO_BACKEND,
                method.as_str(),
                err.status().as_u16(),
                start_time.elapsed(),
            );
            return error_response(&err);
        };

        match self.send(req, &backend, deadline(start_time, self.timeout)).await {
            Ok(response) => {
                let status = response.status();
                let duration = start_time.elapsed();
                self.metrics.record_request(
                    backend.as_str(),
                    method.as_str(),
                    status.as_u16(),
                    duration,
                );

                info!(
                    method = %method,
                    uri = %uri,
                    backend = %backend,
                    status = status.as_u16(),
                    duration_ms = duration.as_millis(),
                    "proxied request"
                );

                response
            }
            Err(err) => {
                let duration = start_time.elapsed();
                self.metrics.record_request(
                    backend.as_str(),
                    method.as_str(),
                    err.status().as_u16(),
                    duration,
                );

                warn!(
                    method = %method,
                    uri = %uri,
                    backend = %backend,
                    duration_ms = duration.as_millis(),
                    error = %err,
                    "forward error"
                );

                error_response(&err)
            }
        }
    }

    /// Send the rewritten request and wrap the response body for counting.
    async fn send<B>(
        &self,
        req: Request<B>,
        backend: &Backend,
        deadline: Instant,
    ) -> Result<Response<ProxyBody>, ForwardError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let outbound = self.rewrite(req, backend)?;

        let response = timeout_at(deadline, self.client.request(outbound))
            .await
            .map_err(|_| ForwardError::Timeout(self.timeout))??;

        let (mut parts, body) = response.into_parts();
        if self.trace {
            parts
                .headers
                .insert(TRACE_HEADER, HeaderValue::from_str(backend.as_str())?);
        }

        let body = CountingBody::new(
            body,
            backend.clone(),
            deadline,
            Arc::clone(&self.state),
            self.metrics.clone(),
        );

        Ok(Response::from_parts(parts, body.boxed_unsync()))
    }

    /// Point the request at `backend`, keeping method, path, headers and body.
    fn rewrite<B>(
        &self,
        req: Request<B>,
        backend: &Backend,
    ) -> Result<Request<ProxyBody>, ForwardError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        parts.uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(backend.as_str())
            .path_and_query(path_and_query)
            .build()?;
        parts
            .headers
            .insert(HOST, HeaderValue::from_str(backend.as_str())?);

        let body: ProxyBody = body.map_err(|e| e.into()).boxed_unsync();
        Ok(Request::from_parts(parts, body))
    }
}

/// Stand-in for "no deadline" when `start + timeout` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// The instant the exchange must finish by.
fn deadline(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Create an error response.
fn error_response(err: &ForwardError) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(format!("{}\n", err.message())))
        .map_err(|never| match never {})
        .boxed_unsync();

    let mut response = Response::new(body);
    *response.status_mut() = err.status();
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
