//! Environment variable override support

use crate::{config::CourierConfig, ConfigError, Result};
use std::env;
use std::str::FromStr;

/// Environment variable override utility
pub struct EnvOverride;

impl EnvOverride {
    /// Apply `COURIER_*` environment variable overrides to configuration
    pub fn apply(mut config: CourierConfig) -> Result<CourierConfig> {
        // App configuration
        if let Ok(name) = env::var("COURIER_APP_NAME") {
            config.app.name = name;
        }
        if let Ok(environment) = env::var("COURIER_APP_ENVIRONMENT") {
            config.app.environment = environment;
        }

        // Server configuration
        if let Ok(host) = env::var("COURIER_SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_var("COURIER_SERVER_PORT")? {
            config.server.port = port;
        }
        if let Some(serializer) = parse_var("COURIER_SERVER_SERIALIZER")? {
            config.server.serializer = serializer;
        }
        if let Some(max_calls) = parse_var("COURIER_SERVER_MAX_CONCURRENT_CALLS")? {
            config.server.max_concurrent_calls = max_calls;
        }
        if let Some(idle) = parse_var("COURIER_SERVER_READER_IDLE_SECS")? {
            config.server.reader_idle_secs = idle;
        }

        // Client configuration
        if let Ok(strategy) = env::var("COURIER_CLIENT_LOAD_BALANCER") {
            config.client.load_balancer = strategy;
        }
        if let Some(serializer) = parse_var("COURIER_CLIENT_SERIALIZER")? {
            config.client.serializer = serializer;
        }
        if let Some(timeout) = parse_var("COURIER_CLIENT_CONNECT_TIMEOUT_SECS")? {
            config.client.connect_timeout_secs = timeout;
        }
        if let Some(timeout) = parse_var("COURIER_CLIENT_REQUEST_TIMEOUT_SECS")? {
            config.client.request_timeout_secs = timeout;
        }
        if let Some(idle) = parse_var("COURIER_CLIENT_WRITER_IDLE_SECS")? {
            config.client.writer_idle_secs = idle;
        }

        // Registry configuration
        if let Ok(kind) = env::var("COURIER_REGISTRY_KIND") {
            config.registry.kind = kind;
        }

        // Logging configuration
        if let Ok(level) = env::var("COURIER_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = env::var("COURIER_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }
}

/// Apply environment variable overrides (convenience function)
pub fn apply_env_overrides(config: CourierConfig) -> Result<CourierConfig> {
    EnvOverride::apply(config)
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment(format!("Invalid {}: {}", name, value))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        env::set_var("COURIER_APP_NAME", "from-env");
        env::set_var("COURIER_SERVER_PORT", "7777");
        env::set_var("COURIER_CLIENT_LOAD_BALANCER", "random");
        env::set_var("COURIER_REGISTRY_KIND", "static");

        let config = EnvOverride::apply(CourierConfig::default()).unwrap();

        assert_eq!(config.app.name, "from-env");
        assert_eq!(config.server.port, 7777);
        assert_eq!(config.client.load_balancer, "random");
        assert_eq!(config.registry.kind, "static");

        env::remove_var("COURIER_APP_NAME");
        env::remove_var("COURIER_SERVER_PORT");
        env::remove_var("COURIER_CLIENT_LOAD_BALANCER");
        env::remove_var("COURIER_REGISTRY_KIND");
    }

    #[test]
    fn test_invalid_numeric_override() {
        env::set_var("COURIER_CLIENT_WRITER_IDLE_SECS", "soon");
        let result = EnvOverride::apply(CourierConfig::default());
        env::remove_var("COURIER_CLIENT_WRITER_IDLE_SECS");

        assert!(matches!(result, Err(ConfigError::Environment(_))));
    }
}
