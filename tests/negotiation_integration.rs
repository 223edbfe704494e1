//! Portal negotiation against a scripted broker

use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use lamco_mjpeg_server::portal::{
    BrokerReply, BrokerRequest, BrokerTransport, NegotiationConfig, NegotiationError,
    NegotiationStep, PermissionSession, ReplyDetails, SessionState, StreamDescriptor,
};

/// Everything the broker was asked, in order
#[derive(Debug, Default)]
struct BrokerLog {
    requests: Vec<BrokerRequest>,
    remotes_opened: Vec<String>,
    sessions_closed: Vec<String>,
}

impl BrokerLog {
    fn steps(&self) -> Vec<NegotiationStep> {
        self.requests.iter().map(BrokerRequest::step).collect()
    }
}

/// Answers each request with the next scripted reply
struct ScriptedBroker {
    replies: VecDeque<BrokerReply>,
    log: Arc<Mutex<BrokerLog>>,
    hang: bool,
}

impl ScriptedBroker {
    fn new(replies: Vec<BrokerReply>) -> (Self, Arc<Mutex<BrokerLog>>) {
        let log = Arc::new(Mutex::new(BrokerLog::default()));
        let broker = Self {
            replies: replies.into(),
            log: Arc::clone(&log),
            hang: false,
        };
        (broker, log)
    }

    /// Broker that never answers
    fn silent() -> (Self, Arc<Mutex<BrokerLog>>) {
        let (mut broker, log) = Self::new(Vec::new());
        broker.hang = true;
        (broker, log)
    }
}

#[async_trait]
impl BrokerTransport for ScriptedBroker {
    async fn call(&mut self, request: BrokerRequest) -> Result<BrokerReply, NegotiationError> {
        self.log.lock().unwrap().requests.push(request);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.replies
            .pop_front()
            .ok_or_else(|| NegotiationError::Transport("script exhausted".to_string()))
    }

    async fn open_pipewire_remote(&mut self, session_handle: &str) -> Result<OwnedFd, NegotiationError> {
        self.log
            .lock()
            .unwrap()
            .remotes_opened
            .push(session_handle.to_string());
        let file = tempfile::tempfile().map_err(|e| NegotiationError::Transport(e.to_string()))?;
        Ok(OwnedFd::from(file))
    }

    async fn close_session(&mut self, session_handle: &str) -> Result<(), NegotiationError> {
        self.log
            .lock()
            .unwrap()
            .sessions_closed
            .push(session_handle.to_string());
        Ok(())
    }
}

fn session_created(handle: &str) -> BrokerReply {
    BrokerReply::success(ReplyDetails {
        session_handle: Some(handle.to_string()),
        streams: Vec::new(),
    })
}

fn started(node_ids: &[u32]) -> BrokerReply {
    BrokerReply::success(ReplyDetails {
        session_handle: None,
        streams: node_ids.iter().copied().map(StreamDescriptor::new).collect(),
    })
}

#[tokio::test]
async fn test_full_handshake_yields_node_once() {
    let (broker, log) = ScriptedBroker::new(vec![
        session_created("S1"),
        BrokerReply::success(ReplyDetails::default()),
        started(&[42]),
    ]);
    let mut session = PermissionSession::new(broker, NegotiationConfig::default());

    let source = session.negotiate().await.unwrap();
    assert_eq!(source.node_id, 42);
    assert_eq!(source.session_handle, "S1");
    assert!(source.remote_fd.is_some());
    assert_eq!(session.state(), SessionState::Started);

    // The grant is handed out exactly once
    let again = session.negotiate().await.unwrap_err();
    assert!(matches!(again, NegotiationError::InvalidState { .. }));

    let log = log.lock().unwrap();
    assert_eq!(
        log.steps(),
        vec![
            NegotiationStep::CreateSession,
            NegotiationStep::SelectSources,
            NegotiationStep::Start
        ]
    );
    assert_eq!(log.remotes_opened, vec!["S1".to_string()]);
}

#[tokio::test]
async fn test_requests_carry_session_handle() {
    let (broker, log) = ScriptedBroker::new(vec![
        session_created("/org/freedesktop/portal/desktop/session/1_42/t"),
        BrokerReply::success(ReplyDetails::default()),
        started(&[7]),
    ]);
    let mut config = NegotiationConfig::with_prefix("itest");
    config.open_pipewire_remote = false;
    let token = config.session_token.clone();
    let mut session = PermissionSession::new(broker, config);

    let source = session.negotiate().await.unwrap();
    assert!(source.remote_fd.is_none());

    let log = log.lock().unwrap();
    assert!(log.remotes_opened.is_empty());
    match &log.requests[0] {
        BrokerRequest::CreateSession { session_handle_token } => assert_eq!(*session_handle_token, token),
        other => panic!("unexpected first request: {:?}", other),
    }
    match &log.requests[1] {
        BrokerRequest::SelectSources {
            session_handle,
            source_types,
            multiple,
        } => {
            assert_eq!(session_handle, "/org/freedesktop/portal/desktop/session/1_42/t");
            assert_eq!(*source_types, 1);
            assert!(!*multiple);
        }
        other => panic!("unexpected second request: {:?}", other),
    }
}

#[tokio::test]
async fn test_denied_select_sources_never_starts() {
    let (broker, log) = ScriptedBroker::new(vec![session_created("S1"), BrokerReply::with_code(1)]);
    let mut session = PermissionSession::new(broker, NegotiationConfig::default());

    let err = session.negotiate().await.unwrap_err();
    assert!(err.is_denied());
    assert!(matches!(
        err,
        NegotiationError::PermissionDenied {
            step: NegotiationStep::SelectSources,
            code: 1
        }
    ));
    assert_eq!(session.state(), SessionState::Denied);

    session.close().await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        log.steps(),
        vec![NegotiationStep::CreateSession, NegotiationStep::SelectSources]
    );
    assert!(log.remotes_opened.is_empty());
    assert_eq!(log.sessions_closed, vec!["S1".to_string()]);
}

#[tokio::test]
async fn test_failure_at_each_step_stops_the_handshake() {
    for failing_step in 0..3 {
        for code in [1u32, 2] {
            let mut replies = vec![
                session_created("S1"),
                BrokerReply::success(ReplyDetails::default()),
                started(&[42]),
            ];
            replies[failing_step] = BrokerReply::with_code(code);
            let (broker, log) = ScriptedBroker::new(replies);
            let mut session = PermissionSession::new(broker, NegotiationConfig::default());

            assert!(session.negotiate().await.is_err());

            let expected_state = if code == 1 { SessionState::Denied } else { SessionState::Failed };
            assert_eq!(session.state(), expected_state);
            assert_eq!(log.lock().unwrap().requests.len(), failing_step + 1);

            // Terminal: nothing further goes out
            assert!(session.negotiate().await.is_err());
            assert_eq!(log.lock().unwrap().requests.len(), failing_step + 1);
        }
    }
}

#[tokio::test]
async fn test_start_without_streams_is_failure() {
    let (broker, _log) = ScriptedBroker::new(vec![
        session_created("S1"),
        BrokerReply::success(ReplyDetails::default()),
        started(&[]),
    ]);
    let mut session = PermissionSession::new(broker, NegotiationConfig::default());

    let err = session.negotiate().await.unwrap_err();
    assert!(matches!(
        err,
        NegotiationError::MalformedReply {
            step: NegotiationStep::Start,
            ..
        }
    ));
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_first_of_several_streams_is_captured() {
    let (broker, _log) = ScriptedBroker::new(vec![
        session_created("S1"),
        BrokerReply::success(ReplyDetails::default()),
        started(&[42, 43, 44]),
    ]);
    let mut session = PermissionSession::new(broker, NegotiationConfig::default());

    assert_eq!(session.negotiate().await.unwrap().node_id, 42);
}

#[tokio::test]
async fn test_request_timeout_fails_session() {
    let (broker, log) = ScriptedBroker::silent();
    let mut config = NegotiationConfig::default();
    config.request_timeout = Some(Duration::from_millis(50));
    let mut session = PermissionSession::new(broker, config);

    let err = session.negotiate().await.unwrap_err();
    assert!(matches!(
        err,
        NegotiationError::Timeout {
            step: NegotiationStep::CreateSession,
            ..
        }
    ));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(log.lock().unwrap().requests.len(), 1);
}

/// Needs a desktop session with a ScreenCast portal and someone to click Share
#[tokio::test]
#[ignore]
async fn test_live_portal_negotiation() {
    let transport = lamco_mjpeg_server::portal::DbusTransport::connect()
        .await
        .unwrap();
    let mut session = PermissionSession::new(transport, NegotiationConfig::default());
    let source = session.negotiate().await.unwrap();
    assert!(source.node_id > 0);
    session.close().await.unwrap();
}
