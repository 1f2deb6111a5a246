//! Configuration management for Tabula
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (TABULA_* prefix, `__` between section and key)
//! 2. tabula.local.toml (gitignored, local overrides)
//! 3. tabula.toml (git-tracked, project config)
//! 4. ~/.config/tabula/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tabula_types::{Consistency, ProtocolVersion};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Tabula driver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TabulaConfig {
    pub connection: ConnectionConfig,
    pub compression: CompressionConfig,
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Native protocol version byte (3, 4 or 5).
    pub protocol_version: u8,
    pub consistency: Consistency,
    pub request_timeout_ms: u64,
    /// Largest frame body accepted from the server.
    pub max_frame_size: usize,
    /// Outgoing frame buffers kept for reuse.
    pub buffer_pool_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol_version: 4,
            consistency: Consistency::default(),
            request_timeout_ms: 12_000,
            max_frame_size: 256 * 1024 * 1024,
            buffer_pool_size: 64,
        }
    }
}

impl ConnectionConfig {
    pub fn protocol_version(&self) -> Result<ProtocolVersion, ConfigError> {
        ProtocolVersion::try_from(self.protocol_version)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress large blob and text values client-side.
    pub enabled: bool,
    pub prefix: String,
    /// Values shorter than this are sent as is.
    pub threshold: usize,
    /// Skip size buckets that historically compress poorly.
    pub adaptive: bool,
    pub target_ratio: f32,
    /// Largest uncompressed length a value may declare.
    pub max_uncompressed: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: "lz4:".to_string(),
            threshold: 1024,
            adaptive: false,
            target_ratio: 1.1,
            max_uncompressed: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Learn tablets from responses and route by them.
    pub tablet_aware: bool,
    /// Coalesce refreshes triggered by server events.
    pub debounce_refresh: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            tablet_aware: true,
            debounce_refresh: true,
        }
    }
}

impl TabulaConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a single TOML file without any layering.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// A configuration that trades CPU for bandwidth on large values.
    pub fn bandwidth_saving() -> Self {
        Self {
            compression: CompressionConfig {
                enabled: true,
                adaptive: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Check values the type system can not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.protocol_version()?;
        if self.connection.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connection.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.compression.prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "compression.prefix must not be empty".to_string(),
            ));
        }
        if !(self.compression.target_ratio.is_finite() && self.compression.target_ratio > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "compression.target_ratio must be a positive number, got {}",
                self.compression.target_ratio
            )));
        }
        Ok(())
    }
}
