//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8080")
    pub listen_addr: String,

    /// Directory static files are served from
    pub document_root: PathBuf,

    /// Path of the MJPEG stream; `<stream_path>/snapshot` serves one frame
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Seconds a viewer waits for a new frame before the latest one is
    /// resent (0 = wait indefinitely)
    #[serde(default)]
    pub client_wait_timeout_secs: u64,
}

impl ServerConfig {
    /// How long a viewer waits before the latest frame is resent
    pub fn client_wait_timeout(&self) -> Option<Duration> {
        super::secs_to_timeout(self.client_wait_timeout_secs)
    }

    /// Stream path without a trailing slash
    pub fn stream_route(&self) -> &str {
        self.stream_path.trim_end_matches('/')
    }

    /// Path of the single-frame endpoint
    pub fn snapshot_route(&self) -> String {
        format!("{}/snapshot", self.stream_route())
    }
}

fn default_stream_path() -> String {
    "/stream".to_string()
}

/// JPEG encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSettings {
    /// JPEG quality (1-100)
    pub quality: u8,

    /// Chroma subsampling ("4:4:4", "4:2:2", "4:2:0", "4:4:0", "gray")
    pub chroma_subsampling: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            quality: 75,
            chroma_subsampling: "4:2:0".to_string(),
        }
    }
}

/// Portal negotiation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSettings {
    /// Seconds to wait for each portal Response (0 = wait indefinitely)
    #[serde(default)]
    pub request_timeout_secs: u64,

    /// Prefix of the session handle token; must be a valid object path element
    #[serde(default = "default_session_token_prefix")]
    pub session_token_prefix: String,

    /// Connect PipeWire through the portal's OpenPipeWireRemote fd
    #[serde(default = "default_true")]
    pub open_pipewire_remote: bool,
}

fn default_session_token_prefix() -> String {
    "lamco_mjpeg".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 0,
            session_token_prefix: default_session_token_prefix(),
            open_pipewire_remote: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Optional log directory (None = console only)
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}
