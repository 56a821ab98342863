//! Outbound CDP message values and id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Allocates message ids for one connection.
///
/// Ids are monotonically increasing and never reused. The allocator is safe
/// to share between concurrent producers.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator starting at id 1
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Take the next id
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// An outbound protocol call: unique id, method name, parameter object.
///
/// Immutable after construction. Serializes to the exact wire shape
/// `{"id": <int>, "method": "<Domain.command>", "params": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    id: u64,
    method: String,
    params: Value,
}

impl Message {
    /// Create a message, drawing the next id from the allocator.
    ///
    /// `params` should be a JSON object; the protocol does not accept
    /// anything else as a parameter payload.
    pub fn new(ids: &IdAllocator, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: ids.next_id(),
            method: method.into(),
            params,
        }
    }

    /// The message id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The protocol method name
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The parameter object
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Look up a single parameter by name
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Serialize to the outbound text frame
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let ids = IdAllocator::new();
        let mut seen = Vec::new();
        for _ in 0..100 {
            let msg = Message::new(&ids, "Page.enable", json!({}));
            seen.push(msg.id());
        }
        for pair in seen.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let ids = Arc::new(IdAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = Arc::clone(&ids);
            handles.push(std::thread::spawn(move || {
                (0..250).map(|_| ids.next_id()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("allocator thread panicked"))
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn encodes_exact_wire_frame() {
        let ids = IdAllocator::new();
        // Burn ids 1-6 so the message under test carries id 7.
        for _ in 0..6 {
            ids.next_id();
        }
        let msg = Message::new(&ids, "foo", json!({"bar": "baz"}));
        assert_eq!(
            msg.encode().expect("encode"),
            r#"{"id":7,"method":"foo","params":{"bar":"baz"}}"#
        );
    }

    #[test]
    fn exposes_params() {
        let ids = IdAllocator::new();
        let msg = Message::new(&ids, "Page.navigate", json!({"url": "about:blank"}));
        assert_eq!(msg.method(), "Page.navigate");
        assert_eq!(msg.param("url"), Some(&json!("about:blank")));
        assert_eq!(msg.param("missing"), None);
    }
}
