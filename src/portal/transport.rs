//! Broker transport abstraction
//!
//! The session state machine talks to the permission broker through
//! [`BrokerTransport`]: one request in, exactly one matching reply out, as a
//! single suspension point. The D-Bus implementation lives in
//! [`super::dbus`]; tests substitute scripted transports.

use std::fmt;
use std::os::fd::OwnedFd;

use async_trait::async_trait;

use super::error::Result;

/// Source type bitmask value for monitors
pub const SOURCE_TYPE_MONITOR: u32 = 1;

/// The three handshake steps, in protocol order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationStep {
    /// `CreateSession`
    CreateSession,
    /// `SelectSources`
    SelectSources,
    /// `Start`
    Start,
}

impl NegotiationStep {
    /// D-Bus method name on `org.freedesktop.portal.ScreenCast`
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::CreateSession => "CreateSession",
            Self::SelectSources => "SelectSources",
            Self::Start => "Start",
        }
    }
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

/// A request to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerRequest {
    /// Open a session under a caller-chosen token
    CreateSession {
        /// Becomes the last element of the session object path
        session_handle_token: String,
    },
    /// Declare what may be captured
    SelectSources {
        /// Handle returned by CreateSession
        session_handle: String,
        /// Source type bitmask (1 = monitor)
        source_types: u32,
        /// Whether more than one source may be picked
        multiple: bool,
    },
    /// Show the dialog and begin capture
    Start {
        /// Handle returned by CreateSession
        session_handle: String,
        /// Parent window identifier, empty for none
        parent_window: String,
    },
}

impl BrokerRequest {
    /// Handshake step this request belongs to
    pub fn step(&self) -> NegotiationStep {
        match self {
            Self::CreateSession { .. } => NegotiationStep::CreateSession,
            Self::SelectSources { .. } => NegotiationStep::SelectSources,
            Self::Start { .. } => NegotiationStep::Start,
        }
    }
}

/// Portal Response result code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode(pub u32);

/// Classified response code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// 0: request succeeded
    Success,
    /// 1: user cancelled the interaction
    Cancelled,
    /// Anything else: the request ended some other way
    Other,
}

impl ResponseCode {
    /// Success
    pub const SUCCESS: ResponseCode = ResponseCode(0);
    /// User cancelled
    pub const CANCELLED: ResponseCode = ResponseCode(1);
    /// Ended for another reason
    pub const OTHER: ResponseCode = ResponseCode(2);

    /// Classify the code
    pub fn kind(&self) -> ResponseKind {
        match self.0 {
            0 => ResponseKind::Success,
            1 => ResponseKind::Cancelled,
            _ => ResponseKind::Other,
        }
    }
}

/// One stream granted by Start
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamDescriptor {
    /// PipeWire node id to capture from
    pub node_id: u32,
    /// Position in the compositor's logical space, if reported
    pub position: Option<(i32, i32)>,
    /// Size in logical pixels, if reported
    pub size: Option<(i32, i32)>,
    /// Source type bitmask of this stream, if reported
    pub source_type: Option<u32>,
}

impl StreamDescriptor {
    /// Descriptor carrying only a node id
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }
}

/// Step-specific payload of a successful reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplyDetails {
    /// CreateSession: the new session handle
    pub session_handle: Option<String>,
    /// Start: granted streams, in broker order
    pub streams: Vec<StreamDescriptor>,
}

/// The single reply matched to one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerReply {
    /// Result code
    pub code: ResponseCode,
    /// Decoded details, empty unless the code is success
    pub details: ReplyDetails,
}

impl BrokerReply {
    /// Successful reply with the given details
    pub fn success(details: ReplyDetails) -> Self {
        Self {
            code: ResponseCode::SUCCESS,
            details,
        }
    }

    /// Reply with a bare result code
    pub fn with_code(code: u32) -> Self {
        Self {
            code: ResponseCode(code),
            details: ReplyDetails::default(),
        }
    }
}

/// Request/reply channel to the permission broker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerTransport: Send {
    /// Issue `request` and wait for exactly one matching reply
    async fn call(&mut self, request: BrokerRequest) -> Result<BrokerReply>;

    /// Ask for a PipeWire remote scoped to the started session
    async fn open_pipewire_remote(&mut self, session_handle: &str) -> Result<OwnedFd>;

    /// Close the session, revoking capture
    async fn close_session(&mut self, session_handle: &str) -> Result<()>;
}
