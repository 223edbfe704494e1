//! Negotiation state machine
//!
//! The whole handshake is one explicit transition table keyed by
//! (current state, event). Success only ever moves forward one step; refusal
//! and transport failure jump to a terminal state; terminal states accept
//! nothing.

use std::fmt;

/// Where a permission session is in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing sent yet
    Idle,
    /// CreateSession sent, awaiting its Response
    SessionRequested,
    /// Session handle received
    SessionCreated,
    /// SelectSources sent, awaiting its Response
    SourcesRequested,
    /// Source selection accepted
    SourcesSelected,
    /// Start sent, awaiting its Response
    StartRequested,
    /// Capture authorized (terminal)
    Started,
    /// User refused (terminal)
    Denied,
    /// Transport or protocol failure (terminal)
    Failed,
}

/// Inputs that drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The next request was issued
    RequestSent,
    /// The pending request's Response reported success
    Succeeded,
    /// The pending request's Response reported user refusal
    Refused,
    /// The broker was unreachable, timed out, or replied nonsense
    TransportFailed,
}

impl SessionState {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Started | Self::Denied | Self::Failed)
    }

    /// True while a request is outstanding
    pub fn is_awaiting_reply(&self) -> bool {
        matches!(
            self,
            Self::SessionRequested | Self::SourcesRequested | Self::StartRequested
        )
    }

    /// Transition table; `None` means the event is not valid in this state
    pub fn next(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        if self.is_terminal() {
            return None;
        }

        match (self, event) {
            (_, Refused) => Some(Denied),
            (_, TransportFailed) => Some(Failed),

            (Idle, RequestSent) => Some(SessionRequested),
            (SessionRequested, Succeeded) => Some(SessionCreated),
            (SessionCreated, RequestSent) => Some(SourcesRequested),
            (SourcesRequested, Succeeded) => Some(SourcesSelected),
            (SourcesSelected, RequestSent) => Some(StartRequested),
            (StartRequested, Succeeded) => Some(Started),

            _ => None,
        }
    }

    /// Position in the forward order, for ordering checks
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::SessionRequested => 1,
            Self::SessionCreated => 2,
            Self::SourcesRequested => 3,
            Self::SourcesSelected => 4,
            Self::StartRequested => 5,
            Self::Started => 6,
            Self::Denied | Self::Failed => 7,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::SessionRequested => "SessionRequested",
            Self::SessionCreated => "SessionCreated",
            Self::SourcesRequested => "SourcesRequested",
            Self::SourcesSelected => "SourcesSelected",
            Self::StartRequested => "StartRequested",
            Self::Started => "Started",
            Self::Denied => "Denied",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}
