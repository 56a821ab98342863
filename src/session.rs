//! Per-target communication channel.
//!
//! A `Session` shares its connection with every other session on the same
//! browser; what it adds is the `Target.sendMessageToTarget` envelope that
//! routes a message to one specific target, and the destroyed-state guard
//! that makes use-after-teardown an immediate error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::cdp::{Connection, Message, Response, SessionResponseReader};
use crate::error::{Error, Result};

type DestroyedListener = Box<dyn Fn() + Send + Sync>;

/// An attached communication channel to one target.
pub struct Session {
    /// Dropped on destroy; `None` means the session is gone.
    connection: Option<Arc<Connection>>,
    session_id: String,
    target_id: String,
    destroyed_listeners: Vec<DestroyedListener>,
}

impl Session {
    /// Create a session for a confirmed attachment
    pub fn new(
        connection: Arc<Connection>,
        target_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            connection: Some(connection),
            session_id: session_id.into(),
            target_id: target_id.into(),
            destroyed_listeners: Vec::new(),
        }
    }

    /// The session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The target id this session is attached to
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Whether this session has been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.connection.is_none()
    }

    /// The shared connection; fails once destroyed
    pub fn connection(&self) -> Result<&Arc<Connection>> {
        self.connection
            .as_ref()
            .ok_or_else(|| Error::TargetDestroyed(self.describe()))
    }

    /// Register a callback invoked when this session is destroyed
    pub fn on_destroyed<F>(&mut self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.destroyed_listeners.push(Box::new(listener));
    }

    /// Wrap a message in the send-to-target envelope and write it.
    ///
    /// The returned reader waits on the *inner* message id; the envelope ack
    /// is drained internally first.
    pub async fn send_message(&self, message: &Message) -> Result<SessionResponseReader<'_>> {
        let connection = self.connection()?;

        let envelope = connection.message(
            "Target.sendMessageToTarget",
            json!({
                "message": message.encode()?,
                "sessionId": self.session_id,
            }),
        );

        let top = connection.send_message(&envelope).await?;
        tracing::trace!(
            envelope_id = envelope.id(),
            inner_id = message.id(),
            session_id = %self.session_id,
            "sent session command"
        );
        Ok(SessionResponseReader::new(top, connection, message.id()))
    }

    /// Send a message and wait for the target's reply
    pub async fn send_message_sync(
        &self,
        message: &Message,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let timeout = timeout.unwrap_or_else(|| {
            self.connection
                .as_ref()
                .map(|c| c.default_timeout())
                .unwrap_or(crate::cdp::DEFAULT_COMMAND_TIMEOUT)
        });
        let mut reader = self.send_message(message).await?;
        reader.wait_for_response(timeout).await
    }

    /// Tear the session down.
    ///
    /// Notifies destroyed-listeners, drops the connection reference, and
    /// clears the listener list. A second call fails with
    /// [`Error::AlreadyDestroyed`].
    pub fn destroy(&mut self) -> Result<()> {
        if self.connection.is_none() {
            return Err(Error::AlreadyDestroyed(self.describe()));
        }

        tracing::debug!(session_id = %self.session_id, target_id = %self.target_id, "destroying session");
        for listener in &self.destroyed_listeners {
            listener();
        }
        self.connection = None;
        self.destroyed_listeners.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("session {} (target {})", self.session_id, self.target_id)
    }

    // --- Conveniences built on the sync-send path. Unlike the core, these
    // escalate protocol-level error replies to Error::Cdp. ---

    /// Enable page lifecycle events
    pub async fn page_enable(&self) -> Result<()> {
        self.call("Page.enable", json!({})).await?;
        Ok(())
    }

    /// Navigate to a URL
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let response = self.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = response
            .result_field("errorText")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            return Err(Error::cdp("Page.navigate", -1, error_text));
        }
        Ok(())
    }

    /// Evaluate a JavaScript expression and return its value
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let response = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = response.result_field("exceptionDetails") {
            let text = details
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("evaluation threw");
            return Err(Error::cdp("Runtime.evaluate", -1, text));
        }

        Ok(response
            .result_field("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Capture a screenshot, decoded from base64
    pub async fn capture_screenshot(
        &self,
        format: Option<&str>,
        quality: Option<u8>,
    ) -> Result<Vec<u8>> {
        let mut params = Map::new();
        if let Some(format) = format {
            params.insert("format".into(), json!(format));
        }
        if let Some(quality) = quality {
            params.insert("quality".into(), json!(quality));
        }

        let response = self
            .call("Page.captureScreenshot", Value::Object(params))
            .await?;

        let data = response
            .result_field("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Decode("screenshot reply carried no data".into()))?;

        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Decode(e.to_string()))
    }

    /// Insert text at the current cursor position
    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.call("Input.insertText", json!({ "text": text })).await?;
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Response> {
        let message = self.connection()?.message(method, params);
        let response = self.send_message_sync(&message, None).await?;
        if response.is_successful() {
            Ok(response)
        } else {
            Err(Error::cdp(
                method,
                response.error_code().unwrap_or(-1),
                response.error_message(false),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cdp::{MockTransport, SocketTransport};

    fn session() -> (Arc<MockTransport>, Arc<Connection>, Session) {
        let mock = Arc::new(MockTransport::new());
        let conn = Arc::new(Connection::new(
            Arc::clone(&mock) as Arc<dyn SocketTransport>
        ));
        let session = Session::new(Arc::clone(&conn), "T1", "S1");
        (mock, conn, session)
    }

    #[tokio::test]
    async fn wraps_messages_in_the_envelope() {
        let (mock, conn, session) = session();
        conn.connect().await;

        let inner = conn.message("Page.enable", json!({}));
        let reader = session.send_message(&inner).await.expect("send");
        assert_eq!(reader.inner_id(), inner.id());

        let sent = mock.sent().await;
        assert_eq!(sent.len(), 1);

        let frame: Value = serde_json::from_str(&sent[0]).expect("outbound frame");
        assert_eq!(frame["method"], json!("Target.sendMessageToTarget"));
        assert_eq!(frame["params"]["sessionId"], json!("S1"));

        let wrapped: Value = serde_json::from_str(
            frame["params"]["message"].as_str().expect("wrapped string"),
        )
        .expect("inner frame");
        assert_eq!(wrapped["id"], json!(inner.id()));
        assert_eq!(wrapped["method"], json!("Page.enable"));
    }

    #[tokio::test]
    async fn destroy_is_guarded_and_notifies() {
        let (_mock, _conn, mut session) = session();

        let notified = Arc::new(AtomicUsize::new(0));
        let notified_in_listener = Arc::clone(&notified);
        session.on_destroyed(move || {
            notified_in_listener.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!session.is_destroyed());
        session.destroy().expect("first destroy");
        assert!(session.is_destroyed());
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        let err = session.destroy().expect_err("second destroy");
        assert!(matches!(err, Error::AlreadyDestroyed(_)));
        // Listeners were cleared by the first destroy.
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sends_fail_after_destroy() {
        let (_mock, conn, mut session) = session();
        conn.connect().await;

        let msg = conn.message("Page.enable", json!({}));
        session.destroy().expect("destroy");

        assert!(matches!(
            session.send_message(&msg).await,
            Err(Error::TargetDestroyed(_))
        ));
        assert!(matches!(
            session.send_message_sync(&msg, None).await,
            Err(Error::TargetDestroyed(_))
        ));
        assert!(matches!(
            session.connection(),
            Err(Error::TargetDestroyed(_))
        ));
    }
}
