//! Capture Error Types

use thiserror::Error;

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;

/// PipeWire capture error types
#[derive(Error, Debug)]
pub enum CaptureError {
    /// PipeWire initialization failed
    #[error("PipeWire initialization failed: {0}")]
    InitializationFailed(String),

    /// Connection to the PipeWire daemon or portal remote failed
    #[error("PipeWire connection failed: {0}")]
    ConnectionFailed(String),

    /// Stream creation failed
    #[error("PipeWire stream creation failed: {0}")]
    StreamCreationFailed(String),

    /// Frame extraction failed
    #[error("Frame extraction failed: {0}")]
    FrameExtractionFailed(String),

    /// Thread communication failed
    #[error("PipeWire thread communication failed: {0}")]
    ThreadCommunicationFailed(String),

    /// Thread panicked
    #[error("PipeWire thread panicked: {0}")]
    ThreadPanic(String),
}
