//! Inbound CDP reply values.

use serde_json::Value;

/// An immutable wrapper over a decoded protocol reply.
///
/// Exactly one of `result` / `error` is semantically present; the absence of
/// `error` means success. Protocol-level errors are data, not local failures:
/// callers inspect them via [`Response::is_successful`] and
/// [`Response::error_message`] and decide whether to escalate.
#[derive(Debug, Clone)]
pub struct Response {
    payload: Value,
}

impl Response {
    /// Wrap a raw decoded payload
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// The message id this reply answers, if the peer echoed one
    pub fn id(&self) -> Option<u64> {
        self.payload.get("id").and_then(Value::as_u64)
    }

    /// True iff no `error` field is present
    pub fn is_successful(&self) -> bool {
        self.payload.get("error").is_none()
    }

    /// The protocol error code, if this is an error reply
    pub fn error_code(&self) -> Option<i64> {
        self.payload
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(Value::as_i64)
    }

    /// Format the `error` object as a single line.
    ///
    /// Joins `code`, `message`, and `data` with " - "; code and data are
    /// included only when `extended` is set. Empty string if there is no
    /// error.
    pub fn error_message(&self, extended: bool) -> String {
        let Some(error) = self.payload.get("error") else {
            return String::new();
        };

        let mut parts: Vec<String> = Vec::new();
        if extended {
            if let Some(code) = error.get("code") {
                parts.push(code.to_string());
            }
        }
        if let Some(message) = error.get("message").and_then(Value::as_str) {
            parts.push(message.to_string());
        }
        if extended {
            if let Some(data) = error.get("data") {
                parts.push(match data {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
        }
        parts.join(" - ")
    }

    /// Look up `result[name]`; absent if there is no such key or no `result`
    pub fn result_field(&self, name: &str) -> Option<&Value> {
        self.payload.get("result").and_then(|r| r.get(name))
    }

    /// The raw decoded payload
    pub fn raw(&self) -> &Value {
        &self.payload
    }
}
