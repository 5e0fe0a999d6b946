//! Prometheus metrics HTTP server.

use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Serves the collector's registry in Prometheus text format.
pub struct MetricsServer {
    listener: TcpListener,
    path: Arc<str>,
    collector: MetricsCollector,
}

impl MetricsServer {
    /// Bind the metrics endpoint.
    pub async fn bind(
        address: SocketAddr,
        path: &str,
        collector: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        info!(address = %listener.local_addr()?, path = %path, "metrics server bound");

        Ok(Self {
            listener,
            path: Arc::from(path),
            collector,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let collector = self.collector.clone();
                            let path = Arc::clone(&self.path);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let response = handle_request(&req, &collector, &path);
                                    async move { Ok::<_, Infallible>(response) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

fn handle_request<B>(
    req: &Request<B>,
    collector: &MetricsCollector,
    metrics_path: &str,
) -> Response<Full<Bytes>> {
    if req.method() != Method::GET {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n".into());
    }

    if req.uri().path() != metrics_path {
        return plain(StatusCode::NOT_FOUND, "Not found\n".into());
    }

    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, collector.registry()) {
        error!(error = %e, "failed to encode metrics");
        return plain(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics\n".into(),
        );
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    response
}

fn plain(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = MetricsCollector::new();
        collector.record_bytes("server1:8080", 10);

        let response = handle_request(&get("/metrics"), &collector, "/metrics");
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("trafficlb_backend_bytes_total"));
    }

    #[test]
    fn test_unknown_path() {
        let collector = MetricsCollector::new();
        let response = handle_request(&get("/other"), &collector, "/metrics");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_method_not_allowed() {
        let collector = MetricsCollector::new();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/metrics")
            .body(())
            .unwrap();
        let response = handle_request(&req, &collector, "/metrics");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = MetricsServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            "/metrics",
            MetricsCollector::new(),
        )
        .await
        .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
