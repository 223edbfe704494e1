//! Permission session
//!
//! Drives CreateSession → SelectSources → Start through a
//! [`BrokerTransport`], one request at a time, recording every transition in
//! the [`SessionState`] machine. The first failure is final: the session
//! lands in `Denied` or `Failed` and issues nothing further.

use std::os::fd::OwnedFd;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::{NegotiationError, Result};
use super::state::{SessionEvent, SessionState};
use super::transport::{
    BrokerReply, BrokerRequest, BrokerTransport, NegotiationStep, ReplyDetails, ResponseKind,
    StreamDescriptor, SOURCE_TYPE_MONITOR,
};

/// Negotiation settings
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Token the session handle is derived from
    pub session_token: String,
    /// Per-request deadline; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
    /// Ask the portal for a dedicated PipeWire remote after Start
    pub open_pipewire_remote: bool,
}

impl NegotiationConfig {
    /// Config with a fresh session token under `prefix`
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            session_token: format!("{}_{}", prefix, uuid::Uuid::new_v4().simple()),
            request_timeout: None,
            open_pipewire_remote: true,
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self::with_prefix("lamco_mjpeg")
    }
}

/// What a successful negotiation hands to the capture feed
#[derive(Debug)]
pub struct CaptureSource {
    /// PipeWire node id of the granted stream
    pub node_id: u32,
    /// Metadata reported for that stream
    pub stream: StreamDescriptor,
    /// Portal-scoped PipeWire remote, if one was obtained
    pub remote_fd: Option<OwnedFd>,
    /// Session handle the grant belongs to
    pub session_handle: String,
}

/// One permission negotiation with the broker
pub struct PermissionSession<T: BrokerTransport> {
    transport: T,
    config: NegotiationConfig,
    state: SessionState,
    session_handle: Option<String>,
}

impl<T: BrokerTransport> PermissionSession<T> {
    /// New session in `Idle`
    pub fn new(transport: T, config: NegotiationConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Idle,
            session_handle: None,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session handle, once CreateSession succeeded
    pub fn session_handle(&self) -> Option<&str> {
        self.session_handle.as_deref()
    }

    /// Run the full handshake
    ///
    /// Only valid from `Idle`; a session negotiates at most once, so the
    /// returned source is produced exactly once. Construct a new session to
    /// try again.
    pub async fn negotiate(&mut self) -> Result<CaptureSource> {
        if self.state != SessionState::Idle {
            return Err(NegotiationError::InvalidState { state: self.state });
        }

        info!("Negotiating screen capture with the portal");

        let session_handle = self
            .exchange(
                BrokerRequest::CreateSession {
                    session_handle_token: self.config.session_token.clone(),
                },
                |details| {
                    details
                        .session_handle
                        .filter(|h| !h.is_empty())
                        .ok_or_else(|| "no session_handle in results".to_string())
                },
            )
            .await?;
        info!("Portal session created: {}", session_handle);
        self.session_handle = Some(session_handle.clone());

        self.exchange(
            BrokerRequest::SelectSources {
                session_handle: session_handle.clone(),
                source_types: SOURCE_TYPE_MONITOR,
                multiple: false,
            },
            |_| Ok(()),
        )
        .await?;

        let stream = self
            .exchange(
                BrokerRequest::Start {
                    session_handle: session_handle.clone(),
                    parent_window: String::new(),
                },
                |details| {
                    let mut streams = details.streams.into_iter();
                    let first = streams
                        .next()
                        .ok_or_else(|| "Start granted no streams".to_string())?;
                    let ignored = streams.count();
                    if ignored > 0 {
                        warn!(
                            "Portal granted {} additional stream(s); only node {} is captured",
                            ignored, first.node_id
                        );
                    }
                    Ok(first)
                },
            )
            .await?;

        info!(
            "Screen capture granted: node {} (position {:?}, size {:?}, source type {:?})",
            stream.node_id, stream.position, stream.size, stream.source_type
        );

        let remote_fd = if self.config.open_pipewire_remote {
            match self.transport.open_pipewire_remote(&session_handle).await {
                Ok(fd) => Some(fd),
                Err(e) => {
                    warn!("OpenPipeWireRemote failed, using the default PipeWire daemon: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(CaptureSource {
            node_id: stream.node_id,
            stream,
            remote_fd,
            session_handle,
        })
    }

    /// Close the portal session if one was created
    pub async fn close(&mut self) -> Result<()> {
        match self.session_handle.take() {
            Some(handle) => self.transport.close_session(&handle).await,
            None => Ok(()),
        }
    }

    /// Send one request and accept its reply
    ///
    /// `accept` turns the success details into what the next step needs; a
    /// rejection there counts as a malformed reply. The state only reaches the
    /// step's success state once `accept` agreed.
    async fn exchange<R, F>(&mut self, request: BrokerRequest, accept: F) -> Result<R>
    where
        F: FnOnce(ReplyDetails) -> std::result::Result<R, String>,
    {
        let step = request.step();
        self.advance(SessionEvent::RequestSent)?;
        debug!("Sending {}", step);

        let reply = match self.await_reply(step, request).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(e)),
        };

        let code = reply.code.0;
        match reply.code.kind() {
            ResponseKind::Success => {}
            ResponseKind::Cancelled => {
                return Err(self.fail(NegotiationError::PermissionDenied { step, code }));
            }
            ResponseKind::Other => {
                return Err(self.fail(NegotiationError::Aborted { step, code }));
            }
        }

        match accept(reply.details) {
            Ok(value) => {
                self.advance(SessionEvent::Succeeded)?;
                Ok(value)
            }
            Err(reason) => Err(self.fail(NegotiationError::MalformedReply { step, reason })),
        }
    }

    async fn await_reply(&mut self, step: NegotiationStep, request: BrokerRequest) -> Result<BrokerReply> {
        match self.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.transport.call(request))
                .await
                .unwrap_or(Err(NegotiationError::Timeout { step, timeout })),
            None => self.transport.call(request).await,
        }
    }

    fn advance(&mut self, event: SessionEvent) -> Result<()> {
        match self.state.next(event) {
            Some(next) => {
                info!("Portal session: {} -> {}", self.state, next);
                self.state = next;
                Ok(())
            }
            None => Err(NegotiationError::InvalidState { state: self.state }),
        }
    }

    fn fail(&mut self, err: NegotiationError) -> NegotiationError {
        let event = if err.is_denied() {
            SessionEvent::Refused
        } else {
            SessionEvent::TransportFailed
        };
        if self.advance(event).is_err() {
            debug!("Failure after terminal state {}: {}", self.state, err);
        }
        warn!("Portal negotiation stopped in {}: {}", self.state, err);
        err
    }
}
