//! Configuration validation.

use crate::config::Config;
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend
/// - No duplicate backends
/// - Non-zero request timeout and health check interval
/// - A health check path that starts with `/`
/// - A known log level
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing the problem.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if !seen.insert(backend) {
            errors.push(format!("duplicate backend: {}", backend));
        }
    }

    if config.balancer.timeout.is_zero() {
        errors.push("balancer timeout must be greater than zero".to_string());
    }

    if config.health_check.interval.is_zero() {
        errors.push("health check interval must be greater than zero".to_string());
    }

    if !config.health_check.path.starts_with('/') {
        errors.push(format!(
            "health check path '{}' must start with '/'",
            config.health_check.path
        ));
    }

    if config.global.metrics.enabled && !config.global.metrics.path.starts_with('/') {
        errors.push(format!(
            "metrics path '{}' must start with '/'",
            config.global.metrics.path
        ));
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
