//! Diagnostics and user-facing error output
//!
//! - [`diagnostics`]: host, desktop, portal backend and PipeWire facts logged
//!   once at startup
//! - [`errors`]: turns an [`anyhow::Error`] into a message with likely causes
//!   and checks to run
//!
//! ```no_run
//! use lamco_mjpeg_server::utils::{format_user_error, log_startup_diagnostics};
//!
//! log_startup_diagnostics();
//!
//! let error = anyhow::anyhow!("Failed to bind 0.0.0.0:8080");
//! eprintln!("{}", format_user_error(&error));
//! ```

pub mod diagnostics;
pub mod errors;

pub use diagnostics::{
    detect_compositor, detect_portal_backends, get_pipewire_version, is_wayland_session,
    log_startup_diagnostics, SystemInfo,
};
pub use errors::{categorize, format_user_error, ErrorCategory};
