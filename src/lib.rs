//! # lamco-mjpeg-server
//!
//! Wayland screen capture republished as a live MJPEG stream over HTTP.
//!
//! # Architecture
//!
//! ```text
//! lamco-mjpeg-server
//!   ├─> PermissionSession (ScreenCast portal: CreateSession → SelectSources → Start)
//!   ├─> CaptureFeed (PipeWire stream on a dedicated thread)
//!   ├─> EncodingPublisher (libjpeg-turbo, runs in the capture callback)
//!   ├─> FrameBroadcastBuffer (latest JPEG, generation counter)
//!   └─> StreamServer (HTTP: multipart stream, snapshot, static files)
//! ```
//!
//! # Data Flow
//!
//! **Video Path:** Portal → PipeWire → JPEG encoder → FrameBroadcastBuffer → MjpegStreamer → Viewer
//!
//! The buffer holds only the newest frame. Publishing never waits on
//! viewers; a slow viewer skips straight to whatever is newest when it next
//! asks.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// PipeWire frame capture
pub mod capture;

/// Server configuration
pub mod config;

/// Negotiation, capture and encoding wired together
pub mod pipeline;

/// ScreenCast portal negotiation
pub mod portal;

/// HTTP server and MJPEG streaming
pub mod server;

/// Diagnostics and user-facing error output
pub mod utils;

/// JPEG encoding and frame hand-off
pub mod video;

pub use config::Config;
pub use pipeline::run_capture_pipeline;
pub use portal::{PermissionSession, SessionState};
pub use server::{MjpegStreamer, StreamServer};
pub use video::{CompressedFrame, FrameBroadcastBuffer, FrameEncoder};
