//! Connection layer: message correlation, response buffering, event dispatch.
//!
//! One `Connection` owns one transport. Outbound [`Message`]s are serialized
//! and written through it; inbound frames are drained by [`Connection::read_data`]
//! and either buffered by message id (replies) or dispatched to listeners
//! (id-less event notifications). Readers consume buffered replies through
//! the at-most-once accessor [`Connection::take_response_for_id`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::message::{IdAllocator, Message};
use super::reader::ResponseReader;
use super::response::Response;
use super::transport::SocketTransport;
use crate::error::{Error, Result};

/// Default bound for synchronous sends when the caller gives none
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Unsolicited protocol notification kinds.
///
/// The registry is keyed by this enum rather than raw method strings; kinds
/// the crate has no special knowledge of still dispatch via `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    TargetCreated,
    TargetDestroyed,
    ReceivedMessageFromTarget,
    LifecycleEvent,
    Other(String),
}

impl EventKind {
    /// Map a wire method name to a kind
    pub fn from_method(method: &str) -> Self {
        match method {
            "Target.targetCreated" => Self::TargetCreated,
            "Target.targetDestroyed" => Self::TargetDestroyed,
            "Target.receivedMessageFromTarget" => Self::ReceivedMessageFromTarget,
            "Page.lifecycleEvent" => Self::LifecycleEvent,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire method name for this kind
    pub fn as_method(&self) -> &str {
        match self {
            Self::TargetCreated => "Target.targetCreated",
            Self::TargetDestroyed => "Target.targetDestroyed",
            Self::ReceivedMessageFromTarget => "Target.receivedMessageFromTarget",
            Self::LifecycleEvent => "Page.lifecycleEvent",
            Self::Other(method) => method,
        }
    }
}

/// Connection tuning knobs
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Raise on malformed inbound frames instead of dropping them
    pub strict: bool,
    /// Artificial delay before each outbound send (debugging aid)
    pub send_delay: Option<Duration>,
    /// Timeout used by `send_message_sync` when the caller passes none
    pub default_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            strict: false,
            send_delay: None,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

type EventHandler = Box<dyn Fn(&Value) + Send + Sync>;

/// A CDP connection over one socket transport.
///
/// The response buffer may grow without bound if callers send messages and
/// never collect the replies; eviction policy is left to the host via
/// [`Connection::buffered_response_count`] and [`Connection::clear_responses`].
pub struct Connection {
    transport: Arc<dyn SocketTransport>,
    ids: IdAllocator,
    config: ConnectionConfig,
    buffer: Mutex<HashMap<u64, Value>>,
    listeners: Mutex<HashMap<EventKind, Vec<EventHandler>>>,
}

impl Connection {
    /// Create a connection with default config
    pub fn new(transport: Arc<dyn SocketTransport>) -> Self {
        Self::with_config(transport, ConnectionConfig::default())
    }

    /// Create a connection with explicit config
    pub fn with_config(transport: Arc<dyn SocketTransport>, config: ConnectionConfig) -> Self {
        Self {
            transport,
            ids: IdAllocator::new(),
            config,
            buffer: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Open the transport; true iff a state transition occurred
    pub async fn connect(&self) -> bool {
        self.transport.connect().await
    }

    /// Close the transport; true iff a state transition occurred
    pub async fn disconnect(&self, reason: &str) -> bool {
        self.transport.disconnect(reason).await
    }

    /// Whether the transport is open
    pub async fn is_connected(&self) -> bool {
        self.transport.is_connected().await
    }

    /// Timeout used for sync sends when the caller passes none
    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    /// Build a message with the next id from this connection's allocator
    pub fn message(&self, method: impl Into<String>, params: Value) -> Message {
        Message::new(&self.ids, method, params)
    }

    /// Register a listener for an event kind.
    ///
    /// Any number of listeners may be registered per kind; they are invoked
    /// in registration order with the event's `params` payload.
    pub async fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .await
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Serialize and write a message; never waits for the reply.
    ///
    /// Returns a reader bound to this message's id. Fails if the transport
    /// reports the write did not succeed.
    pub async fn send_message(&self, message: &Message) -> Result<ResponseReader<'_>> {
        if let Some(delay) = self.config.send_delay {
            tokio::time::sleep(delay).await;
        }

        let data = message.encode()?;
        if !self.transport.send_data(&data).await {
            return Err(Error::transport(format!(
                "write rejected for message {} ({})",
                message.id(),
                message.method()
            )));
        }

        tracing::trace!(id = message.id(), method = message.method(), "sent command");
        Ok(ResponseReader::new(self, message.id()))
    }

    /// Send a message and wait for its reply.
    ///
    /// Timing out raises [`Error::OperationTimedOut`]; an absent Response is
    /// never returned.
    pub async fn send_message_sync(
        &self,
        message: &Message,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let mut reader = self.send_message(message).await?;
        reader
            .wait_for_response(timeout.unwrap_or(self.config.default_timeout))
            .await
    }

    /// Drain all currently available inbound frames.
    ///
    /// Replies (frames carrying an `id`) land in the response buffer,
    /// overwriting any stale unread entry for the same id. Id-less frames
    /// with a `method` are event notifications: they are dispatched to
    /// registered listeners and never buffered. Anything else is malformed
    /// and either fatal (strict mode) or dropped with a warning.
    ///
    /// Returns true iff at least one reply was buffered on this call.
    pub async fn read_data(&self) -> Result<bool> {
        let frames = self.transport.receive_data().await;
        let mut buffered = false;

        for frame in frames {
            let value: Value = match serde_json::from_str(&frame) {
                Ok(v) => v,
                Err(e) => {
                    if self.config.strict {
                        return Err(Error::MalformedResponse(e.to_string()));
                    }
                    tracing::warn!("skipping unparseable frame: {}", e);
                    continue;
                }
            };

            let Value::Object(map) = value else {
                if self.config.strict {
                    return Err(Error::MalformedResponse("frame is not a JSON object".into()));
                }
                tracing::warn!("skipping non-object frame");
                continue;
            };

            if let Some(id) = map.get("id").and_then(Value::as_u64) {
                self.buffer_response(id, Value::Object(map)).await;
                buffered = true;
            } else if let Some(method) = map.get("method").and_then(Value::as_str) {
                let kind = EventKind::from_method(method);
                let params = map
                    .get("params")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));

                // Non-flattened CDP delivers session replies inside this
                // event; surface them in the buffer under the inner id.
                if kind == EventKind::ReceivedMessageFromTarget
                    && self.buffer_wrapped_reply(&params).await
                {
                    buffered = true;
                }

                self.dispatch(&kind, &params).await;
            } else if self.config.strict {
                return Err(Error::InvalidResponse(
                    "frame has neither id nor method".into(),
                ));
            } else {
                tracing::warn!("skipping frame with neither id nor method");
            }
        }

        Ok(buffered)
    }

    /// Whether a reply for this id is buffered (non-consuming)
    pub async fn has_response_for_id(&self, id: u64) -> bool {
        self.buffer.lock().await.contains_key(&id)
    }

    /// Consume the buffered reply for this id.
    ///
    /// At-most-once: a second call for the same id returns None until a new
    /// reply arrives for it.
    pub async fn take_response_for_id(&self, id: u64) -> Option<Value> {
        self.buffer.lock().await.remove(&id)
    }

    /// Number of buffered, unconsumed replies
    pub async fn buffered_response_count(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Drop every buffered reply; returns how many were discarded.
    ///
    /// Eviction hook for hosts that send without collecting.
    pub async fn clear_responses(&self) -> usize {
        let mut buffer = self.buffer.lock().await;
        let count = buffer.len();
        buffer.clear();
        count
    }

    async fn buffer_response(&self, id: u64, payload: Value) {
        let mut buffer = self.buffer.lock().await;
        if buffer.insert(id, payload).is_some() {
            tracing::trace!(id, "overwrote stale buffered response");
        }
    }

    /// Decode `params.message` of a Target.receivedMessageFromTarget event
    /// and buffer it when it is an id-carrying reply.
    async fn buffer_wrapped_reply(&self, params: &Value) -> bool {
        let Some(inner) = params.get("message").and_then(Value::as_str) else {
            return false;
        };
        let Ok(payload) = serde_json::from_str::<Value>(inner) else {
            tracing::trace!("unparseable wrapped session message");
            return false;
        };
        let Some(id) = payload.get("id").and_then(Value::as_u64) else {
            // A session-level event, not a reply; nothing to buffer.
            return false;
        };
        self.buffer_response(id, payload).await;
        true
    }

    async fn dispatch(&self, kind: &EventKind, params: &Value) {
        let listeners = self.listeners.lock().await;
        if let Some(handlers) = listeners.get(kind) {
            tracing::trace!(method = kind.as_method(), count = handlers.len(), "dispatching event");
            for handler in handlers {
                handler(params);
            }
        }
    }
}
