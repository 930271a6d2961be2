//! Core configuration structures

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main Courier configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Application metadata
    #[serde(default)]
    pub app: AppConfig,

    /// Provider side settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Consumer side settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Service registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to and publishes in the registry
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Serializer code used for responses
    #[serde(default)]
    pub serializer: u8,

    /// Upper bound on dispatches running at the same time
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Close a connection after this long without an inbound frame
    #[serde(default = "default_reader_idle_secs")]
    pub reader_idle_secs: u64,

    /// Largest body a frame may declare
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Load balancing strategy (random, round_robin, hash)
    #[serde(default = "default_load_balancer")]
    pub load_balancer: String,

    /// Serializer code used for requests
    #[serde(default)]
    pub serializer: u8,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Send a heartbeat after this long without an outbound frame
    #[serde(default = "default_writer_idle_secs")]
    pub writer_idle_secs: u64,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry backend (memory, static)
    #[serde(default = "default_registry_kind")]
    pub kind: String,

    /// Fixed service instances for the static backend, as `host:port` strings
    #[serde(default)]
    pub services: HashMap<String, Vec<String>>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            serializer: 0,
            max_concurrent_calls: default_max_concurrent_calls(),
            reader_idle_secs: default_reader_idle_secs(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            load_balancer: default_load_balancer(),
            serializer: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            writer_idle_secs: default_writer_idle_secs(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: default_registry_kind(),
            services: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_app_name() -> String { "courier-app".to_string() }
fn default_environment() -> String { "development".to_string() }
fn default_server_host() -> String { "127.0.0.1".to_string() }
fn default_server_port() -> u16 { 9999 }
fn default_max_concurrent_calls() -> usize { 256 }
fn default_reader_idle_secs() -> u64 { 30 }
fn default_max_frame_size() -> usize { 8 * 1024 * 1024 } // 8MB
fn default_load_balancer() -> String { "round_robin".to_string() }
fn default_connect_timeout_secs() -> u64 { 20 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_writer_idle_secs() -> u64 { 15 }
fn default_registry_kind() -> String { "memory".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }

impl CourierConfig {
    /// `host:port` the server listens on
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn reader_idle(&self) -> Duration {
        Duration::from_secs(self.server.reader_idle_secs)
    }

    pub fn writer_idle(&self) -> Duration {
        Duration::from_secs(self.client.writer_idle_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.client.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.client.request_timeout_secs)
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.app.environment == "production" || self.app.environment == "prod"
    }
}
