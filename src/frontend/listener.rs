//! Frontend listener implementation.
//!
//! Accepts client connections and serves HTTP/1.1 on each, handing every
//! request to the balancer.

use crate::balancer::Balancer;
use crate::metrics::MetricsCollector;
use crate::util::RequestId;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

/// Frontend listener that accepts and handles connections.
pub struct FrontendListener {
    /// Balancer every request is dispatched to.
    balancer: Arc<Balancer>,
    /// TCP listener.
    listener: TcpListener,
    /// Metrics collector.
    metrics: MetricsCollector,
}

impl FrontendListener {
    /// Bind the listener.
    pub async fn bind(
        address: SocketAddr,
        balancer: Arc<Balancer>,
        metrics: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;

        info!(
            listen = %listener.local_addr()?,
            backends = balancer.pool().len(),
            "frontend listener bound"
        );

        Ok(Self {
            balancer,
            listener,
            metrics,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the listener, accepting connections until shutdown.
    #[instrument(skip_all, fields(listen = ?self.listener.local_addr().ok()))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("frontend listener starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }
    }

    /// Serve one client connection on its own task.
    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let balancer = Arc::clone(&self.balancer);
        let metrics = self.metrics.clone();
        let connection_id = RequestId::short();

        metrics.connection_opened();

        tokio::spawn(async move {
            let start_time = Instant::now();
            let io = TokioIo::new(stream);

            let service = service_fn(move |req| {
                let balancer = Arc::clone(&balancer);
                let span = info_span!(
                    "request",
                    id = %RequestId::new(),
                    client = %client_addr,
                );
                async move { Ok::<_, Infallible>(balancer.handle(req).await) }.instrument(span)
            });

            let result = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await;

            metrics.connection_closed();

            let duration = start_time.elapsed();
            match result {
                Ok(()) => debug!(
                    connection_id = %connection_id,
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    "connection completed"
                ),
                Err(e) => warn!(
                    connection_id = %connection_id,
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    error = %e,
                    "connection handling failed"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_frontend_listener_bind() {
        let metrics = MetricsCollector::new();
        let balancer = Arc::new(Balancer::new(&Config::default(), metrics.clone()).unwrap());

        let listener =
            FrontendListener::bind("127.0.0.1:0".parse().unwrap(), balancer, metrics).await;
        assert!(listener.is_ok());
        assert_ne!(listener.unwrap().local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_fails() {
        let metrics = MetricsCollector::new();
        let balancer = Arc::new(Balancer::new(&Config::default(), metrics.clone()).unwrap());

        let first = FrontendListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::clone(&balancer),
            metrics.clone(),
        )
        .await
        .unwrap();
        let taken = first.local_addr().unwrap();

        let second = FrontendListener::bind(taken, balancer, metrics).await;
        assert!(second.is_err());
    }
}
