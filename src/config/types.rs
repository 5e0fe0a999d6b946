//! Configuration data types.

use crate::backend::Backend;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Listener and forwarding settings
    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Health probe settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Ordered backend pool; order decides selection ties
    #[serde(default = "default_backends")]
    pub backends: Vec<Backend>,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics endpoint is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Listener and forwarding settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    /// Address and port to listen on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Upper bound for a proxied exchange and for each health probe
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Talk to backends over HTTPS
    #[serde(default)]
    pub https: bool,

    /// Add the `lb-from` header to proxied responses
    #[serde(default)]
    pub trace: bool,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            timeout: default_timeout(),
            https: false,
            trace: false,
        }
    }
}

/// Health probe settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Pause between two full probe passes
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Path probed with GET on every backend
    #[serde(default = "default_health_path")]
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            path: default_health_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            balancer: BalancerConfig::default(),
            health_check: HealthCheckConfig::default(),
            backends: default_backends(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}

fn default_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_backends() -> Vec<Backend> {
    ["server1:8080", "server2:8080", "server3:8080"]
        .into_iter()
        .filter_map(|addr| addr.parse().ok())
        .collect()
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.balancer.listen.port(), 8090);
        assert_eq!(config.balancer.timeout, Duration::from_secs(3));
        assert!(!config.balancer.https);
        assert!(!config.balancer.trace);
        assert_eq!(config.health_check.interval, Duration::from_secs(5));
        assert_eq!(config.health_check.path, "/health");
        assert!(!config.global.metrics.enabled);
    }

    #[test]
    fn test_default_backends_in_order() {
        let config = Config::default();
        let names: Vec<&str> = config.backends.iter().map(|b| b.as_str()).collect();
        assert_eq!(names, ["server1:8080", "server2:8080", "server3:8080"]);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.balancer.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_humantime_durations() {
        let yaml = r#"
balancer:
  timeout: 1500ms
health_check:
  interval: 1m
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.balancer.timeout, Duration::from_millis(1500));
        assert_eq!(config.health_check.interval, Duration::from_secs(60));
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_yaml::from_str("pretty").unwrap();
        assert_eq!(format, LogFormat::Pretty);

        let format: LogFormat = serde_yaml::from_str("json").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
