//! trafficlb - a least-traffic HTTP reverse-proxy load balancer
//!
//! Usage:
//!     trafficlb [--config <path>] [--port 8090] [--timeout-sec 3] [--https] [--trace]
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use trafficlb::backend::Backend;
use trafficlb::config::{load_config, validate_config, Config};
use trafficlb::frontend::FrontendListener;
use trafficlb::metrics::{MetricsCollector, MetricsServer};
use trafficlb::util::{init_logging, ShutdownSignal};
use trafficlb::Balancer;

/// A least-traffic HTTP reverse-proxy load balancer.
#[derive(Parser, Debug)]
#[command(name = "trafficlb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Request and health probe timeout, in seconds
    #[arg(long = "timeout-sec", value_name = "SECONDS")]
    timeout_sec: Option<u64>,

    /// Talk to backends over HTTPS
    #[arg(long)]
    https: bool,

    /// Add the lb-from header to proxied responses
    #[arg(long)]
    trace: bool,

    /// Backend address (host:port); repeat to build the pool in order
    #[arg(short, long = "backend", value_name = "HOST:PORT")]
    backends: Vec<Backend>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

impl Cli {
    /// Apply command line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.balancer.listen = SocketAddr::new(config.balancer.listen.ip(), port);
        }
        if let Some(secs) = self.timeout_sec {
            config.balancer.timeout = Duration::from_secs(secs);
        }
        if self.https {
            config.balancer.https = true;
        }
        if self.trace {
            config.balancer.trace = true;
        }
        if !self.backends.is_empty() {
            config.backends = self.backends.clone();
        }
        if let Some(level) = &self.log_level {
            config.global.log_level = level.clone();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => Config::default(),
    };
    cli.apply(&mut config);

    validate_config(&config)
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    init_logging(&config.global.log_level, &config.global.log_format)
        .context("failed to initialize logging")?;

    if cli.validate {
        info!("configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.balancer.listen);
        println!("  Timeout: {:?}", config.balancer.timeout);
        println!(
            "  Health check: GET {} every {:?}",
            config.health_check.path, config.health_check.interval
        );
        println!("  Backends: {}", config.backends.len());
        for backend in &config.backends {
            println!("    - {}", backend);
        }
        return Ok(());
    }

    info!(
        listen = %config.balancer.listen,
        timeout_ms = config.balancer.timeout.as_millis(),
        https = config.balancer.https,
        trace = config.balancer.trace,
        backends = config.backends.len(),
        "trafficlb starting"
    );

    for backend in &config.backends {
        info!(backend = %backend, "configured backend");
    }

    run(config)
}

/// Run the load balancer with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run_async(config))
}

/// Async entry point for the load balancer.
async fn run_async(config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    let metrics = MetricsCollector::new();

    let balancer = Arc::new(
        Balancer::new(&config, metrics.clone()).context("failed to build load balancer")?,
    );

    let mut handles = vec![balancer.start_health_monitor(shutdown.subscribe())];

    if config.global.metrics.enabled {
        let server = MetricsServer::bind(
            config.global.metrics.address,
            &config.global.metrics.path,
            metrics.clone(),
        )
        .await
        .with_context(|| {
            format!(
                "failed to bind metrics server on {}",
                config.global.metrics.address
            )
        })?;
        handles.push(tokio::spawn(server.run(shutdown.subscribe())));
    }

    let listener = FrontendListener::bind(config.balancer.listen, balancer, metrics)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.balancer.listen))?;
    handles.push(tokio::spawn(listener.run(shutdown.subscribe())));

    info!("trafficlb is running");
    info!("press Ctrl+C to stop");

    shutdown.on_ctrl_c().await;

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "task ended abnormally");
        }
    }

    info!("trafficlb shut down complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "trafficlb",
            "--port",
            "9000",
            "--timeout-sec",
            "7",
            "--https",
            "--trace",
            "--backend",
            "a:1",
            "--backend",
            "b:2",
        ]);

        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.balancer.listen.port(), 9000);
        assert_eq!(config.balancer.timeout, Duration::from_secs(7));
        assert!(config.balancer.https);
        assert!(config.balancer.trace);
        assert_eq!(
            config.backends,
            vec!["a:1".parse::<Backend>().unwrap(), "b:2".parse().unwrap()]
        );
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let cli = Cli::parse_from(["trafficlb"]);

        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.balancer.listen.port(), 8090);
        assert_eq!(config.balancer.timeout, Duration::from_secs(3));
        assert!(!config.balancer.https);
        assert!(!config.balancer.trace);
        assert_eq!(config.backends.len(), 3);
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        let result = Cli::try_parse_from(["trafficlb", "--backend", "no-port"]);
        assert!(result.is_err());
    }
}
