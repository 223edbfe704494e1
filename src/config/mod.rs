//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - Environment variables
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub mod types;

pub use types::{EncoderSettings, LoggingConfig, PortalSettings, ServerConfig};

use crate::portal::NegotiationConfig;
use crate::video::{ChromaSubsampling, EncoderConfig};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// JPEG encoder configuration
    #[serde(default)]
    pub encoder: EncoderSettings,
    /// Portal negotiation configuration
    #[serde(default)]
    pub portal: PortalSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Config {
            server: ServerConfig {
                listen_addr: "0.0.0.0:8080".to_string(),
                document_root: PathBuf::from("./www"),
                stream_path: "/stream".to_string(),
                client_wait_timeout_secs: 0,
            },
            encoder: EncoderSettings::default(),
            portal: PortalSettings::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate listen address
        self.server
            .listen_addr
            .parse::<SocketAddr>()
            .context("Invalid listen address")?;

        let stream_path = &self.server.stream_path;
        if !stream_path.starts_with('/') || self.server.stream_route().is_empty() {
            anyhow::bail!("Invalid stream path: {:?} (must be absolute, not /)", stream_path);
        }
        if !stream_path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
        {
            anyhow::bail!(
                "Invalid stream path: {:?} (only A-Z, a-z, 0-9, /, -, _ and . allowed)",
                stream_path
            );
        }

        if !(1..=100).contains(&self.encoder.quality) {
            anyhow::bail!("Invalid JPEG quality: {} (expected 1-100)", self.encoder.quality);
        }

        self.encoder
            .chroma_subsampling
            .parse::<ChromaSubsampling>()
            .context("Invalid chroma subsampling")?;

        let prefix = &self.portal.session_token_prefix;
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!(
                "Invalid session token prefix: {:?} (only A-Z, a-z, 0-9 and _ allowed)",
                prefix
            );
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        Ok(())
    }

    /// Override configuration with CLI arguments
    ///
    /// Only arguments actually given replace file values. A listen host
    /// without a port keeps the configured port.
    pub fn with_overrides(
        mut self,
        listen: Option<String>,
        port: Option<u16>,
        quality: Option<u8>,
        document_root: Option<PathBuf>,
    ) -> Self {
        match (listen, port) {
            (Some(host), port) => {
                let port = port
                    .or_else(|| self.listen_port())
                    .unwrap_or(DEFAULT_PORT);
                self.server.listen_addr = match host.parse::<IpAddr>() {
                    Ok(ip) => SocketAddr::new(ip, port).to_string(),
                    Err(_) => format!("{}:{}", host, port),
                };
            }
            (None, Some(port)) => {
                if let Ok(mut addr) = self.server.listen_addr.parse::<SocketAddr>() {
                    addr.set_port(port);
                    self.server.listen_addr = addr.to_string();
                }
            }
            (None, None) => {}
        }

        if let Some(quality) = quality {
            self.encoder.quality = quality;
        }
        if let Some(root) = document_root {
            self.server.document_root = root;
        }

        self
    }

    /// Encoder settings in the encoder's own types
    pub fn encoder_config(&self) -> Result<EncoderConfig> {
        let subsampling = self
            .encoder
            .chroma_subsampling
            .parse::<ChromaSubsampling>()
            .context("Invalid chroma subsampling")?;

        Ok(EncoderConfig {
            quality: self.encoder.quality,
            subsampling,
        })
    }

    /// Negotiation settings for a new permission session
    pub fn negotiation_config(&self) -> NegotiationConfig {
        let mut config = NegotiationConfig::with_prefix(&self.portal.session_token_prefix);
        config.request_timeout = secs_to_timeout(self.portal.request_timeout_secs);
        config.open_pipewire_remote = self.portal.open_pipewire_remote;
        config
    }

    fn listen_port(&self) -> Option<u16> {
        self.server
            .listen_addr
            .parse::<SocketAddr>()
            .ok()
            .map(|addr| addr.port())
    }
}

/// Port used when neither the file nor the command line names one
const DEFAULT_PORT: u16 = 8080;

/// 0 means no deadline
pub(crate) fn secs_to_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
