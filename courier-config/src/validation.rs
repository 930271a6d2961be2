//! Configuration validation utilities

use crate::{config::*, ConfigError, Result};

const LOAD_BALANCERS: [&str; 6] = [
    "random",
    "round_robin",
    "roundrobin",
    "hash",
    "consistent_hash",
    "consistenthash",
];
const REGISTRY_KINDS: [&str; 2] = ["memory", "static"];
const SERIALIZER_CODES: [u8; 3] = [0, 1, 2];
const MIN_FRAME_SIZE: usize = 1024;
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Validate complete configuration
pub fn validate_config(config: &CourierConfig) -> Result<()> {
    validate_app_config(&config.app)?;
    validate_server_config(&config.server)?;
    validate_client_config(&config.client)?;
    validate_registry_config(&config.registry)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

pub fn validate_app_config(config: &AppConfig) -> Result<()> {
    if config.name.is_empty() {
        return Err(ConfigError::Validation("App name cannot be empty".to_string()));
    }
    Ok(())
}

pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.host.is_empty() {
        return Err(ConfigError::Validation("Server host cannot be empty".to_string()));
    }

    validate_serializer(config.serializer)?;

    if config.max_concurrent_calls == 0 {
        return Err(ConfigError::Validation(
            "Max concurrent calls must be greater than 0".to_string(),
        ));
    }

    if config.reader_idle_secs == 0 {
        return Err(ConfigError::Validation(
            "Reader idle timeout must be greater than 0".to_string(),
        ));
    }

    validate_frame_size(config.max_frame_size)
}

pub fn validate_client_config(config: &ClientConfig) -> Result<()> {
    let strategy = config.load_balancer.to_lowercase();
    if !LOAD_BALANCERS.contains(&strategy.as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid load balancer '{}'. Valid values: {:?}",
            config.load_balancer, LOAD_BALANCERS
        )));
    }

    validate_serializer(config.serializer)?;

    if config.connect_timeout_secs == 0 || config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation("Client timeouts must be greater than 0".to_string()));
    }

    if config.writer_idle_secs == 0 {
        return Err(ConfigError::Validation(
            "Writer idle interval must be greater than 0".to_string(),
        ));
    }

    validate_frame_size(config.max_frame_size)
}

pub fn validate_registry_config(config: &RegistryConfig) -> Result<()> {
    if !REGISTRY_KINDS.contains(&config.kind.as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid registry kind '{}'. Valid values: {:?}",
            config.kind, REGISTRY_KINDS
        )));
    }

    for (service, endpoints) in &config.services {
        if service.is_empty() {
            return Err(ConfigError::Validation("Service name cannot be empty".to_string()));
        }
        for endpoint in endpoints {
            let valid = endpoint
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::Validation(format!(
                    "Invalid endpoint '{}' for service '{}'",
                    endpoint, service
                )));
            }
        }
    }

    Ok(())
}

pub fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.level.to_lowercase().as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid log level '{}'. Valid values: {:?}",
            config.level, valid_levels
        )));
    }

    let valid_formats = ["text", "json"];
    if !valid_formats.contains(&config.format.as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid log format '{}'. Valid values: {:?}",
            config.format, valid_formats
        )));
    }

    Ok(())
}

fn validate_serializer(code: u8) -> Result<()> {
    if !SERIALIZER_CODES.contains(&code) {
        return Err(ConfigError::Validation(format!(
            "Unknown serializer code {}. Valid values: {:?}",
            code, SERIALIZER_CODES
        )));
    }
    Ok(())
}

fn validate_frame_size(size: usize) -> Result<()> {
    if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&size) {
        return Err(ConfigError::Validation(format!(
            "Max frame size must be between {} and {} bytes",
            MIN_FRAME_SIZE, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&CourierConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_load_balancer() {
        let mut config = CourierConfig::default();
        config.client.load_balancer = "least_loaded".to_string();
        assert!(validate_config(&config).is_err());

        config.client.load_balancer = "HASH".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_unknown_serializer() {
        let mut config = CourierConfig::default();
        config.server.serializer = 3;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_static_endpoints() {
        let mut config = CourierConfig::default();
        config.registry.kind = "static".to_string();
        config
            .registry
            .services
            .insert("HelloService".to_string(), vec!["127.0.0.1:9999".to_string()]);
        assert!(validate_config(&config).is_ok());

        config
            .registry
            .services
            .insert("EchoService".to_string(), vec!["no-port".to_string()]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_frame_size_bounds() {
        let mut config = CourierConfig::default();
        config.server.max_frame_size = 16;
        assert!(validate_config(&config).is_err());
    }
}
