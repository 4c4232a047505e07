//! Correlation table for in-flight request/reply exchanges.
//!
//! Maps a correlation id to the single-shot sender the waiting caller listens
//! on. An entry is inserted before its request is published and leaves the
//! table exactly once: taken by the reply consumer on a match, or removed by
//! the caller when its timer fires.
//!
//! ```text
//!  caller                        table                       reply consumer
//!  ──────                        ─────                       ──────────────
//!  register(id) ───────────────▶ id → tx
//!  publish(request)
//!  wait(rx, timeout)
//!                                id → tx ◀──────────────────  take(id)
//!                                (gone)                       tx.send(reply)
//!     or, on timeout:
//!  remove(id) ─────────────────▶ (gone)
//! ```

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::error::{NotifyError, Result};

/// Pending reply entries keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingReplies {
    entries: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl PendingReplies {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending reply and returns the receiver to await.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateCorrelation` when a reply with the same id is already
    /// awaited; the existing entry is left untouched.
    pub async fn register(&self, correlation_id: &str) -> Result<oneshot::Receiver<Value>> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(correlation_id) {
            return Err(NotifyError::duplicate_correlation(correlation_id));
        }

        let (sender, receiver) = oneshot::channel();
        entries.insert(correlation_id.to_string(), sender);
        Ok(receiver)
    }

    /// Takes the entry for a reply that matched, if one is pending.
    pub async fn take(&self, correlation_id: &str) -> Option<oneshot::Sender<Value>> {
        self.entries.lock().await.remove(correlation_id)
    }

    /// Removes an entry on timeout or publish failure.
    ///
    /// Returns `false` when the entry was already taken by a matching reply.
    pub async fn remove(&self, correlation_id: &str) -> bool {
        self.entries.lock().await.remove(correlation_id).is_some()
    }

    /// Whether a reply for `correlation_id` is awaited.
    pub async fn is_pending(&self, correlation_id: &str) -> bool {
        self.entries.lock().await.contains_key(correlation_id)
    }

    /// Number of awaited replies.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no reply is awaited.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drops every entry; waiting callers observe a closed channel.
    pub async fn abandon_all(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let abandoned = entries.len();
        entries.clear();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn matched_reply_resolves_waiter_once() {
        let table = PendingReplies::new();
        let receiver = table.register("abc").await.unwrap();

        let sender = table.take("abc").await.expect("entry should be pending");
        sender.send(json!({"ok": true})).unwrap();

        assert_eq!(receiver.await.unwrap(), json!({"ok": true}));
        assert!(table.take("abc").await.is_none(), "second match must find no entry");
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn removal_after_match_reports_taken() {
        let table = PendingReplies::new();
        let _receiver = table.register("abc").await.unwrap();

        assert!(table.take("abc").await.is_some());
        assert!(!table.remove("abc").await);
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let table = PendingReplies::new();
        let _receiver = table.register("abc").await.unwrap();

        let error = table.register("abc").await.unwrap_err();
        assert!(matches!(error, NotifyError::DuplicateCorrelation { .. }));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn abandoned_entries_close_receivers() {
        let table = PendingReplies::new();
        let receiver = table.register("abc").await.unwrap();

        assert_eq!(table.abandon_all().await, 1);
        assert!(receiver.await.is_err());
        assert!(!table.is_pending("abc").await);
    }
}
