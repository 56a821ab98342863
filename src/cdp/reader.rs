//! One-shot response cursors.
//!
//! A [`ResponseReader`] tracks a single message id against its connection's
//! buffer: pending until the reply shows up, resolved forever after. The
//! wait primitive is a cooperative poll loop with short sleeps bounded by a
//! deadline; timing out is always an error, never a silent null.
//!
//! [`SessionResponseReader`] adds the envelope phase for session messages:
//! the inner target-level reply is not observable until the enclosing
//! `Target.sendMessageToTarget` ack has been drained from the buffer.

use std::time::Duration;

use tokio::time::Instant;

use super::connection::Connection;
use super::response::Response;
use crate::error::{Error, Result};

/// Sleep between poll attempts while waiting for a reply
const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Cursor over one connection's buffer for one message id.
///
/// State machine: pending -> resolved, no way back.
pub struct ResponseReader<'c> {
    connection: &'c Connection,
    message_id: u64,
    response: Option<Response>,
}

impl std::fmt::Debug for ResponseReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseReader")
            .field("message_id", &self.message_id)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

impl<'c> ResponseReader<'c> {
    /// Bind a reader to a message id on this connection
    pub fn new(connection: &'c Connection, message_id: u64) -> Self {
        Self {
            connection,
            message_id,
            response: None,
        }
    }

    /// The message id this reader waits on
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Whether the reply has been consumed into this reader
    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Probe for the reply without waiting.
    ///
    /// Checks the buffer, triggers one `read_data` drain if needed, and
    /// re-probes. Resolving consumes the buffered entry; once resolved the
    /// reader stays resolved.
    pub async fn check_for_response(&mut self) -> Result<bool> {
        if self.response.is_some() {
            return Ok(true);
        }

        if let Some(payload) = self.connection.take_response_for_id(self.message_id).await {
            self.response = Some(Response::new(payload));
            return Ok(true);
        }

        self.connection.read_data().await?;

        if let Some(payload) = self.connection.take_response_for_id(self.message_id).await {
            self.response = Some(Response::new(payload));
            return Ok(true);
        }

        Ok(false)
    }

    /// Poll until the reply arrives or `timeout` elapses.
    ///
    /// Fails with [`Error::OperationTimedOut`] at the deadline. Waiting
    /// again on a resolved reader returns immediately.
    pub async fn wait_for_response(&mut self, timeout: Duration) -> Result<Response> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.check_for_response().await? {
                return self.get_response();
            }
            if Instant::now() >= deadline {
                tracing::debug!(id = self.message_id, ?timeout, "wait for response timed out");
                return Err(Error::OperationTimedOut { timeout });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// The resolved response; fails if still pending. Performs no I/O.
    pub fn get_response(&self) -> Result<Response> {
        self.response.clone().ok_or(Error::NoResponseAvailable)
    }
}

enum Phase<'c> {
    AwaitingEnvelope(ResponseReader<'c>),
    AwaitingInner(ResponseReader<'c>),
    Resolved(Response),
}

/// Cursor for a session message sent inside a `Target.sendMessageToTarget`
/// envelope.
///
/// Two buffered entries are involved, under different ids: the envelope ack
/// (outer id) and the target's actual reply (inner id). The inner reply must
/// never resolve before the ack has been drained, even if it arrives first.
pub struct SessionResponseReader<'c> {
    connection: &'c Connection,
    inner_id: u64,
    phase: Phase<'c>,
}

impl<'c> SessionResponseReader<'c> {
    /// Pair the envelope's reader with the inner message id
    pub fn new(envelope: ResponseReader<'c>, connection: &'c Connection, inner_id: u64) -> Self {
        Self {
            connection,
            inner_id,
            phase: Phase::AwaitingEnvelope(envelope),
        }
    }

    /// The inner message id this reader ultimately waits on
    pub fn inner_id(&self) -> u64 {
        self.inner_id
    }

    /// Whether the inner reply has been consumed into this reader
    pub fn has_response(&self) -> bool {
        matches!(self.phase, Phase::Resolved(_))
    }

    /// Advance the state machine without waiting.
    ///
    /// Phase one drains the envelope ack; only then is the inner id probed.
    /// Both phases can complete within a single call when both entries are
    /// already buffered.
    pub async fn check_for_response(&mut self) -> Result<bool> {
        if matches!(self.phase, Phase::Resolved(_)) {
            return Ok(true);
        }

        if let Phase::AwaitingEnvelope(envelope) = &mut self.phase {
            if !envelope.check_for_response().await? {
                return Ok(false);
            }
            let ack = envelope.get_response()?;
            if !ack.is_successful() {
                // The ack is not the caller's answer; the wait will time
                // out rather than surface it as the inner reply.
                tracing::debug!(
                    envelope_id = envelope.message_id(),
                    error = %ack.error_message(true),
                    "envelope ack reported an error"
                );
            }
            self.phase = Phase::AwaitingInner(ResponseReader::new(self.connection, self.inner_id));
        }

        if let Phase::AwaitingInner(inner) = &mut self.phase {
            if inner.check_for_response().await? {
                let response = inner.get_response()?;
                self.phase = Phase::Resolved(response);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Poll until the inner reply arrives or `timeout` elapses
    pub async fn wait_for_response(&mut self, timeout: Duration) -> Result<Response> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.check_for_response().await? {
                return self.get_response();
            }
            if Instant::now() >= deadline {
                tracing::debug!(
                    inner_id = self.inner_id,
                    ?timeout,
                    "wait for session response timed out"
                );
                return Err(Error::OperationTimedOut { timeout });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// The resolved inner response; fails if still pending
    pub fn get_response(&self) -> Result<Response> {
        match &self.phase {
            Phase::Resolved(response) => Ok(response.clone()),
            _ => Err(Error::NoResponseAvailable),
        }
    }
}
