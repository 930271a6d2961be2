//! Configuration loading utilities

use crate::{config::CourierConfig, ConfigError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file formats
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()?.to_str().map(|ext| match ext.to_lowercase().as_str() {
            "toml" => ConfigFormat::Toml,
            "json" => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        })
    }
}

/// Configuration loader
pub struct ConfigLoader {
    search_paths: Vec<String>,
    file_names: Vec<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            search_paths: vec![
                ".".to_string(),
                "config".to_string(),
                "/etc/courier".to_string(),
            ],
            file_names: vec!["courier".to_string()],
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search only the given directories
    pub fn with_search_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_search_path<P: Into<String>>(mut self, path: P) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn add_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.file_names.push(name.into());
        self
    }

    /// Load configuration from a specific file
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<CourierConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let format = ConfigFormat::from_extension(path).unwrap_or(ConfigFormat::Yaml);
        parse_content(&content, format)
    }

    /// Load configuration by searching for config files
    pub fn load(&self) -> Result<CourierConfig> {
        if let Some(path) = self.find_config_file() {
            tracing::info!("Loading configuration from: {}", path.display());
            return self.load_file(&path);
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(CourierConfig::default())
    }

    /// Load, apply `COURIER_*` overrides, then validate
    pub fn load_with_env(&self) -> Result<CourierConfig> {
        let config = crate::env::apply_env_overrides(self.load()?)?;
        crate::validation::validate_config(&config)?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        let extensions = ["yaml", "yml", "toml", "json"];

        for search_path in &self.search_paths {
            for file_name in &self.file_names {
                for ext in &extensions {
                    let path = Path::new(search_path).join(format!("{}.{}", file_name, ext));
                    if path.exists() {
                        return Some(path);
                    }
                }
            }
        }

        None
    }
}

fn parse_content(content: &str, format: ConfigFormat) -> Result<CourierConfig> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(ConfigError::Yaml),
        ConfigFormat::Toml => toml::from_str(content).map_err(ConfigError::Toml),
        ConfigFormat::Json => serde_json::from_str(content).map_err(ConfigError::Json),
    }
}
