//! Configuration file loading.

use crate::config::{validate_config, Config};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a YAML file.
///
/// Missing sections fall back to their defaults; the result is validated
/// before it is returned.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;

    let config: Config = serde_yaml::from_str(&contents)?;

    validate_config(&config).map_err(ConfigError::ValidationError)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
global:
  log_level: debug
  log_format: pretty
balancer:
  listen: "127.0.0.1:8095"
  timeout: 2s
  https: true
  trace: true
health_check:
  interval: 10s
  path: /healthz
backends:
  - "10.0.0.1:8080"
  - "10.0.0.2:8080"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.balancer.listen.port(), 8095);
        assert_eq!(config.balancer.timeout, Duration::from_secs(2));
        assert!(config.balancer.https);
        assert!(config.balancer.trace);
        assert_eq!(config.health_check.path, "/healthz");
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].as_str(), "10.0.0.1:8080");
    }

    #[test]
    fn test_load_minimal_config() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"backends:\n  - \"127.0.0.1:9000\"\n").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.balancer.listen.port(), 8090);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(matches!(result.unwrap_err(), ConfigError::ReadError(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not: valid: yaml: {{{}}}").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_bad_backend_address() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"backends:\n  - \"http://server1:8080\"\n").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_fails_validation() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"backends: []\n").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }
}
