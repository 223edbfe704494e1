//! XDG Desktop Portal screen-capture negotiation
//!
//! Obtains user consent and a PipeWire node through the ScreenCast portal.
//!
//! # Flow
//!
//! 1. CreateSession with a caller-chosen session token
//! 2. SelectSources: one monitor, no multi-select
//! 3. Start: the portal shows its dialog and, on consent, lists the streams
//! 4. OpenPipeWireRemote (optional): a PipeWire connection scoped to the grant
//!
//! Each step's result arrives asynchronously as a `Response` signal. The
//! [`PermissionSession`] state machine consumes those through the
//! [`BrokerTransport`] abstraction, which presents each step as a single
//! request/reply exchange.

pub mod dbus;
pub mod error;
pub mod registry;
pub mod session;
pub mod state;
pub mod transport;

pub use dbus::DbusTransport;
pub use error::{NegotiationError, Result};
pub use registry::{PendingReply, ReplyRegistry};
pub use session::{CaptureSource, NegotiationConfig, PermissionSession};
pub use state::{SessionEvent, SessionState};
pub use transport::{
    BrokerReply, BrokerRequest, BrokerTransport, NegotiationStep, ReplyDetails, ResponseCode,
    ResponseKind, StreamDescriptor, SOURCE_TYPE_MONITOR,
};
