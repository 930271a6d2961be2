//! # Courier Configuration
//!
//! Configuration for Courier servers and clients. Supports YAML, TOML and
//! JSON files with `COURIER_*` environment variable overrides.

pub mod config;
pub mod env;
pub mod loader;
pub mod validation;

pub use config::*;
pub use env::EnvOverride;
pub use loader::ConfigLoader;
pub use validation::validate_config;

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
