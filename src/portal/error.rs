//! Portal negotiation errors

use std::time::Duration;

use thiserror::Error;

use super::state::SessionState;
use super::transport::NegotiationStep;

/// Result type for negotiation operations
pub type Result<T> = std::result::Result<T, NegotiationError>;

/// Why a permission session did not reach `Started`
#[derive(Error, Debug)]
pub enum NegotiationError {
    /// The user dismissed or refused the portal dialog
    #[error("Portal permission denied at {step} (response code {code})")]
    PermissionDenied {
        /// Step that was refused
        step: NegotiationStep,
        /// Portal response code
        code: u32,
    },

    /// The portal ended the request for a reason other than refusal
    #[error("Portal aborted {step} (response code {code})")]
    Aborted {
        /// Step that was aborted
        step: NegotiationStep,
        /// Portal response code
        code: u32,
    },

    /// D-Bus connection or method call failure
    #[error("Portal transport error: {0}")]
    Transport(String),

    /// A successful Response was missing data the next step needs
    #[error("Portal reply to {step} malformed: {reason}")]
    MalformedReply {
        /// Step whose reply was malformed
        step: NegotiationStep,
        /// What was wrong
        reason: String,
    },

    /// No Response arrived within the configured deadline
    #[error("Portal {step} timed out after {timeout:?}")]
    Timeout {
        /// Step that timed out
        step: NegotiationStep,
        /// Configured deadline
        timeout: Duration,
    },

    /// Operation not valid in the current session state
    #[error("Portal session cannot negotiate from state {state}")]
    InvalidState {
        /// State the session was in
        state: SessionState,
    },
}

impl NegotiationError {
    /// Explicit user refusal, as opposed to a failure
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

impl From<zbus::Error> for NegotiationError {
    fn from(err: zbus::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<zbus::zvariant::Error> for NegotiationError {
    fn from(err: zbus::zvariant::Error) -> Self {
        Self::Transport(format!("D-Bus encoding: {}", err))
    }
}
