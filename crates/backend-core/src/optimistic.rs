use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::types::{Message, MessageState, ThreadId, UserId};

/// Default lifetime of an unconfirmed provisional message.
pub const DEFAULT_PENDING_TTL_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Outstanding {
    thread_id: ThreadId,
    body: String,
    expires_at_ms: u64,
}

/// Creates provisional messages and remembers them until they resolve.
///
/// Local keys are `local-<session nonce>-<sequence>`. The nonce is random per
/// tracker and the sequence is monotonic, so keys never repeat within a
/// process.
#[derive(Debug, Clone)]
pub struct SendTracker {
    nonce: String,
    next_seq: u64,
    ttl_ms: u64,
    outstanding: HashMap<String, Outstanding>,
}

impl Default for SendTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_TTL_MS)
    }
}

impl SendTracker {
    pub fn new(ttl_ms: u64) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self {
            nonce: nonce[..8].to_owned(),
            next_seq: 1,
            ttl_ms: ttl_ms.max(1),
            outstanding: HashMap::new(),
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Create a pending message for immediate display.
    pub fn create_provisional(
        &mut self,
        thread_id: ThreadId,
        sender_id: Option<UserId>,
        body: impl Into<String>,
        now_ms: u64,
    ) -> Message {
        let local_key = format!("local-{}-{}", self.nonce, self.next_seq);
        self.next_seq += 1;
        let body = body.into();
        let expires_at_ms = now_ms.saturating_add(self.ttl_ms);

        self.outstanding.insert(
            local_key.clone(),
            Outstanding {
                thread_id,
                body: body.clone(),
                expires_at_ms,
            },
        );
        debug!(thread_id, %local_key, expires_at_ms, "created provisional message");

        Message {
            id: None,
            local_key,
            thread_id,
            sender_id,
            body,
            timestamp_ms: now_ms,
            state: MessageState::Pending,
            expires_at_ms: Some(expires_at_ms),
            client_token: None,
        }
    }

    /// Forget a failed send and hand back its body for the compose input.
    pub fn on_send_failed(&mut self, local_key: &str) -> Option<String> {
        self.outstanding.remove(local_key).map(|entry| entry.body)
    }

    /// Drop outstanding entries of `thread_id` that are no longer pending in
    /// `displayed`, i.e. confirmed or evicted by the last merge.
    pub fn retain_unresolved(&mut self, thread_id: ThreadId, displayed: &[Message]) {
        self.outstanding.retain(|local_key, entry| {
            entry.thread_id != thread_id
                || displayed
                    .iter()
                    .any(|message| message.is_pending() && message.local_key == *local_key)
        });
    }

    /// Forget every outstanding send of a thread (thread view torn down).
    pub fn forget_thread(&mut self, thread_id: ThreadId) {
        self.outstanding.retain(|_, entry| entry.thread_id != thread_id);
    }

    /// Number of sends still waiting for confirmation in `thread_id`.
    pub fn outstanding_in(&self, thread_id: ThreadId) -> usize {
        self.outstanding
            .values()
            .filter(|entry| entry.thread_id == thread_id)
            .count()
    }

    /// Earliest deadline among outstanding sends, if any.
    pub fn next_expiry_ms(&self) -> Option<u64> {
        self.outstanding
            .values()
            .map(|entry| entry.expires_at_ms)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_message_is_pending_with_expiry() {
        let mut tracker = SendTracker::new(60_000);
        let msg = tracker.create_provisional(7, Some(335), "Hello", 1_000);

        assert_eq!(msg.state, MessageState::Pending);
        assert_eq!(msg.id, None);
        assert_eq!(msg.thread_id, 7);
        assert_eq!(msg.sender_id, Some(335));
        assert_eq!(msg.timestamp_ms, 1_000);
        assert_eq!(msg.expires_at_ms, Some(61_000));
        assert!(msg.local_key.starts_with("local-"));
        assert_eq!(tracker.outstanding_in(7), 1);
    }

    #[test]
    fn local_keys_are_unique_within_and_across_trackers() {
        let mut a = SendTracker::default();
        let mut b = SendTracker::default();
        let k1 = a.create_provisional(7, None, "x", 0).local_key;
        let k2 = a.create_provisional(7, None, "x", 0).local_key;
        let k3 = b.create_provisional(7, None, "x", 0).local_key;

        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
        assert_ne!(k2, k3);
    }

    #[test]
    fn failed_send_returns_body_once() {
        let mut tracker = SendTracker::default();
        let msg = tracker.create_provisional(7, Some(1), "Hello", 0);

        assert_eq!(tracker.on_send_failed(&msg.local_key).as_deref(), Some("Hello"));
        assert_eq!(tracker.on_send_failed(&msg.local_key), None);
        assert_eq!(tracker.outstanding_in(7), 0);
    }

    #[test]
    fn retain_unresolved_drops_confirmed_sends_of_that_thread_only() {
        let mut tracker = SendTracker::default();
        let confirmed = tracker.create_provisional(7, Some(1), "a", 0);
        let still_pending = tracker.create_provisional(7, Some(1), "b", 0);
        let other_thread = tracker.create_provisional(8, Some(1), "c", 0);

        let mut confirmed_copy = Message::confirmed(99, 7, Some(1), "a", 5);
        confirmed_copy.local_key = confirmed.local_key.clone();
        tracker.retain_unresolved(7, &[confirmed_copy, still_pending.clone()]);

        assert_eq!(tracker.outstanding_in(7), 1);
        assert_eq!(tracker.outstanding_in(8), 1);
        assert_eq!(tracker.on_send_failed(&other_thread.local_key).as_deref(), Some("c"));
    }

    #[test]
    fn reports_earliest_expiry_and_forgets_threads() {
        let mut tracker = SendTracker::new(10);
        tracker.create_provisional(7, None, "a", 100);
        tracker.create_provisional(8, None, "b", 50);
        assert_eq!(tracker.next_expiry_ms(), Some(60));

        tracker.forget_thread(8);
        assert_eq!(tracker.next_expiry_ms(), Some(110));
    }
}
