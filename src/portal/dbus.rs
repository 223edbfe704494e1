//! XDG Desktop Portal ScreenCast over D-Bus
//!
//! Every portal method returns a Request object path immediately; the real
//! result arrives later as an `org.freedesktop.portal.Request.Response`
//! signal on that path. This transport:
//!
//! 1. Subscribes once to all `Response` signals and routes them through a
//!    [`ReplyRegistry`] keyed by object path.
//! 2. Picks a `handle_token` per call, predicts the Request path
//!    (`/org/freedesktop/portal/desktop/request/<sender>/<token>`) and
//!    registers it *before* calling, so a fast Response cannot be lost.
//! 3. Moves the registration if the portal returns a different path.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Structure, Value};
use zbus::{Connection, MatchRule, Message, MessageStream};

use super::error::{NegotiationError, Result};
use super::registry::ReplyRegistry;
use super::transport::{
    BrokerReply, BrokerRequest, BrokerTransport, NegotiationStep, ReplyDetails, ResponseCode,
    StreamDescriptor,
};

const PORTAL_BUS_NAME: &str = "org.freedesktop.portal.Desktop";
const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
const SCREENCAST_INTERFACE: &str = "org.freedesktop.portal.ScreenCast";
const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";
const SESSION_INTERFACE: &str = "org.freedesktop.portal.Session";
const REQUEST_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/request";

/// Results dictionary of a Response signal
type ResponseResults = HashMap<String, OwnedValue>;

/// Portal ScreenCast transport over the session bus
pub struct DbusTransport {
    connection: Connection,
    proxy: zbus::Proxy<'static>,
    sender_element: String,
    registry: Arc<ReplyRegistry<Message>>,
    dispatcher: JoinHandle<()>,
}

impl DbusTransport {
    /// Connect to the session bus and subscribe to portal responses
    pub async fn connect() -> Result<Self> {
        let connection = Connection::session().await?;
        debug!("Connected to D-Bus session bus");
        Self::with_connection(connection).await
    }

    /// Use an existing bus connection
    pub async fn with_connection(connection: Connection) -> Result<Self> {
        let proxy = zbus::ProxyBuilder::new(&connection)
            .interface(SCREENCAST_INTERFACE)?
            .path(PORTAL_PATH)?
            .destination(PORTAL_BUS_NAME)?
            .build()
            .await?;

        let unique_name = connection
            .unique_name()
            .ok_or_else(|| NegotiationError::Transport("bus connection has no unique name".into()))?;
        let sender_element = sender_path_element(unique_name.as_str());

        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface(REQUEST_INTERFACE)?
            .member("Response")?
            .build();
        let stream = MessageStream::for_match_rule(rule, &connection, None).await?;

        let registry = Arc::new(ReplyRegistry::new());
        let dispatcher = tokio::spawn(dispatch_responses(stream, Arc::clone(&registry)));

        info!("Portal transport ready (sender {})", unique_name);

        Ok(Self {
            connection,
            proxy,
            sender_element,
            registry,
            dispatcher,
        })
    }

    /// Underlying bus connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn request_path(&self, handle_token: &str) -> String {
        format!("{}/{}/{}", REQUEST_PATH_PREFIX, self.sender_element, handle_token)
    }

    async fn send(&self, request: &BrokerRequest, handle_token: &str) -> Result<Message> {
        let method = request.step().method_name();
        let mut options: HashMap<&str, Value<'_>> = HashMap::new();
        options.insert("handle_token", Value::from(handle_token));

        let message = match request {
            BrokerRequest::CreateSession {
                session_handle_token,
            } => {
                options.insert(
                    "session_handle_token",
                    Value::from(session_handle_token.as_str()),
                );
                self.proxy.call_method(method, &(options,)).await?
            }
            BrokerRequest::SelectSources {
                session_handle,
                source_types,
                multiple,
            } => {
                let session = ObjectPath::try_from(session_handle.as_str())?;
                options.insert("types", Value::from(*source_types));
                options.insert("multiple", Value::from(*multiple));
                self.proxy.call_method(method, &(session, options)).await?
            }
            BrokerRequest::Start {
                session_handle,
                parent_window,
            } => {
                let session = ObjectPath::try_from(session_handle.as_str())?;
                self.proxy
                    .call_method(method, &(session, parent_window.as_str(), options))
                    .await?
            }
        };

        Ok(message)
    }
}

impl Drop for DbusTransport {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[async_trait]
impl BrokerTransport for DbusTransport {
    async fn call(&mut self, request: BrokerRequest) -> Result<BrokerReply> {
        let step = request.step();
        let handle_token = format!("lamco_mjpeg_{}", uuid::Uuid::new_v4().simple());

        let mut pending = self.registry.register(self.request_path(&handle_token));
        debug!("Calling {} (expecting Response on {})", step, pending.path());

        let message = self.send(&request, &handle_token).await?;
        let body = message.body();
        let returned: OwnedObjectPath = body.deserialize()?;
        pending.rekey(returned.as_str());

        let response = pending
            .wait()
            .await
            .ok_or_else(|| NegotiationError::Transport("response dispatcher stopped".into()))?;

        let body = response.body();
        let (code, results): (u32, ResponseResults) = body.deserialize()?;
        trace!("{} Response: code={} keys={:?}", step, code, results.keys());
        decode_reply(step, ResponseCode(code), &results)
    }

    async fn open_pipewire_remote(&mut self, session_handle: &str) -> Result<OwnedFd> {
        let session = ObjectPath::try_from(session_handle)?;
        let options: HashMap<&str, Value<'_>> = HashMap::new();

        let message = self
            .proxy
            .call_method("OpenPipeWireRemote", &(session, options))
            .await?;
        let body = message.body();
        let fd: zbus::zvariant::OwnedFd = body.deserialize()?;

        debug!("Received PipeWire remote fd for {}", session_handle);
        Ok(fd.into())
    }

    async fn close_session(&mut self, session_handle: &str) -> Result<()> {
        let proxy: zbus::Proxy<'_> = zbus::ProxyBuilder::new(&self.connection)
            .interface(SESSION_INTERFACE)?
            .path(session_handle.to_string())?
            .destination(PORTAL_BUS_NAME)?
            .build()
            .await?;
        proxy.call_method("Close", &()).await?;
        info!("Portal session {} closed", session_handle);
        Ok(())
    }
}

async fn dispatch_responses(mut stream: MessageStream, registry: Arc<ReplyRegistry<Message>>) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                warn!("Error on portal Response stream: {}", e);
                continue;
            }
        };

        let path = match message.header().path() {
            Some(path) => path.to_string(),
            None => continue,
        };

        if !registry.dispatch(&path, message) {
            trace!("No waiter for Response on {}", path);
        }
    }
    debug!("Portal Response stream ended");
}

/// Object-path form of a unique bus name: `:1.42` becomes `1_42`
pub(crate) fn sender_path_element(unique_name: &str) -> String {
    unique_name.trim_start_matches(':').replace('.', "_")
}

fn decode_reply(
    step: NegotiationStep,
    code: ResponseCode,
    results: &ResponseResults,
) -> Result<BrokerReply> {
    let mut details = ReplyDetails::default();
    if code != ResponseCode::SUCCESS {
        return Ok(BrokerReply { code, details });
    }

    match step {
        NegotiationStep::CreateSession => {
            details.session_handle = results.get("session_handle").and_then(|value| {
                match &**value {
                    Value::Str(s) => Some(s.to_string()),
                    Value::ObjectPath(p) => Some(p.to_string()),
                    other => {
                        warn!("session_handle has unexpected type {:?}", other.value_signature());
                        None
                    }
                }
            });
        }
        NegotiationStep::SelectSources => {}
        NegotiationStep::Start => {
            details.streams = match results.get("streams") {
                Some(value) => parse_streams(value)?,
                None => Vec::new(),
            };
        }
    }

    Ok(BrokerReply { code, details })
}

/// Parse Start's `streams` value, signature `a(ua{sv})`
fn parse_streams(value: &Value<'_>) -> Result<Vec<StreamDescriptor>> {
    let malformed = |reason: String| NegotiationError::MalformedReply {
        step: NegotiationStep::Start,
        reason,
    };

    let Value::Array(array) = value else {
        return Err(malformed(format!(
            "streams has signature {}, expected a(ua{{sv}})",
            value.value_signature()
        )));
    };

    let mut streams = Vec::with_capacity(array.len());
    for entry in array.iter() {
        let Value::Structure(entry) = entry else {
            return Err(malformed("stream entry is not a structure".into()));
        };
        let fields = entry.fields();

        let node_id = match fields.first() {
            Some(Value::U32(id)) => *id,
            _ => return Err(malformed("stream entry has no u32 node id".into())),
        };

        let mut descriptor = StreamDescriptor::new(node_id);
        if let Some(Value::Dict(props)) = fields.get(1) {
            let props: HashMap<String, Value<'_>> = props
                .try_clone()
                .and_then(TryInto::try_into)
                .map_err(|e: zbus::zvariant::Error| malformed(format!("stream properties: {}", e)))?;
            descriptor.position = parse_pair(&props, "position");
            descriptor.size = parse_pair(&props, "size");
            descriptor.source_type = props.get("source_type").and_then(|v| match v {
                Value::U32(t) => Some(*t),
                _ => None,
            });
        }

        streams.push(descriptor);
    }

    Ok(streams)
}

/// Read an `(ii)` property
fn parse_pair(props: &HashMap<String, Value<'_>>, key: &str) -> Option<(i32, i32)> {
    let value = props.get(key)?;
    match value.downcast_ref::<Structure<'_>>() {
        Ok(structure) => match structure.fields() {
            [Value::I32(a), Value::I32(b)] => Some((*a, *b)),
            fields => {
                debug!("Stream property '{}' has unexpected fields: {:?}", key, fields);
                None
            }
        },
        Err(_) => {
            debug!(
                "Stream property '{}' is not a structure: {:?}",
                key,
                value.value_signature()
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_path_element() {
        assert_eq!(sender_path_element(":1.42"), "1_42");
        assert_eq!(sender_path_element(":1.2345"), "1_2345");
    }

    #[test]
    fn test_failed_response_carries_no_details() {
        let reply = decode_reply(
            NegotiationStep::CreateSession,
            ResponseCode::CANCELLED,
            &ResponseResults::new(),
        )
        .unwrap();
        assert_eq!(reply.code, ResponseCode::CANCELLED);
        assert_eq!(reply.details, ReplyDetails::default());
    }

    #[test]
    fn test_successful_start_without_streams_is_empty() {
        let reply =
            decode_reply(NegotiationStep::Start, ResponseCode::SUCCESS, &ResponseResults::new())
                .unwrap();
        assert!(reply.details.streams.is_empty());
    }

    #[test]
    fn test_streams_must_be_an_array() {
        let err = parse_streams(&Value::from(7u32)).unwrap_err();
        assert!(matches!(err, NegotiationError::MalformedReply { .. }));
    }

    #[tokio::test]
    #[ignore = "requires a desktop session with xdg-desktop-portal"]
    async fn test_connect_to_portal() {
        let transport = DbusTransport::connect().await.unwrap();
        assert!(transport.sender_element.contains('_'));
    }
}
