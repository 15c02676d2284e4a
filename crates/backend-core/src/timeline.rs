use thiserror::Error;

use crate::{
    reconcile::{ConfirmationMatcher, ContentMatcher, Reconciler},
    types::{Message, ThreadId, ThreadSnapshot, UserId},
};

/// Errors that can occur while editing a thread timeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineMergeError {
    /// A message belongs to another thread.
    #[error("message for thread {found} cannot be added to thread {expected}")]
    WrongThread { expected: ThreadId, found: ThreadId },
    /// An operation referenced a local key that is not present.
    #[error("timeline item with local key '{0}' was not found")]
    MissingLocalKey(String),
    /// A fetch confirmed the entry before it could be withdrawn.
    #[error("timeline item with local key '{0}' is already confirmed")]
    AlreadyConfirmed(String),
}

/// Displayed message set of one open thread with bounded retention.
#[derive(Debug, Clone)]
pub struct ThreadTimeline<M = ContentMatcher> {
    thread_id: ThreadId,
    title: Option<String>,
    current_user_id: Option<UserId>,
    messages: Vec<Message>,
    max_items: usize,
    reconciler: Reconciler<M>,
}

impl ThreadTimeline<ContentMatcher> {
    /// Create an empty timeline with an item cap (`max_items >= 1`).
    pub fn new(thread_id: ThreadId, max_items: usize) -> Self {
        Self::with_reconciler(thread_id, max_items, Reconciler::new())
    }
}

impl<M: ConfirmationMatcher> ThreadTimeline<M> {
    pub fn with_reconciler(
        thread_id: ThreadId,
        max_items: usize,
        reconciler: Reconciler<M>,
    ) -> Self {
        Self {
            thread_id,
            title: None,
            current_user_id: None,
            messages: Vec::new(),
            max_items: max_items.max(1),
            reconciler,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn set_title(&mut self, title: Option<String>) {
        self.title = title;
    }

    pub fn set_current_user(&mut self, user_id: Option<UserId>) {
        self.current_user_id = user_id;
    }

    pub fn current_user_id(&self) -> Option<UserId> {
        self.current_user_id
    }

    /// Show a provisional message at the end of the timeline.
    pub fn insert_provisional(&mut self, message: Message) -> Result<(), TimelineMergeError> {
        if message.thread_id != self.thread_id {
            return Err(TimelineMergeError::WrongThread {
                expected: self.thread_id,
                found: message.thread_id,
            });
        }
        self.messages.push(message);
        self.trim_to_max();
        Ok(())
    }

    /// Withdraw a provisional entry after a failed send. Entries a fetch has
    /// already confirmed stay, since the server evidently stored them.
    pub fn remove_pending(&mut self, local_key: &str) -> Result<Message, TimelineMergeError> {
        let idx = self
            .messages
            .iter()
            .position(|message| message.local_key == local_key)
            .ok_or_else(|| TimelineMergeError::MissingLocalKey(local_key.to_owned()))?;
        if !self.messages[idx].is_pending() {
            return Err(TimelineMergeError::AlreadyConfirmed(local_key.to_owned()));
        }
        Ok(self.messages.remove(idx))
    }

    /// Reconcile a fetched message set into the timeline.
    pub fn apply_fetch(&mut self, incoming: &[Message], now_ms: u64) {
        self.messages = self
            .reconciler
            .merge(self.thread_id, &self.messages, incoming, now_ms);
        self.trim_to_max();
    }

    /// Drop pending entries whose deadline passed. Returns how many went away.
    pub fn evict_expired(&mut self, now_ms: u64) -> usize {
        let before = self.messages.len();
        self.messages.retain(|message| !message.is_expired(now_ms));
        before - self.messages.len()
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            thread_id: self.thread_id,
            title: self.title.clone(),
            current_user_id: self.current_user_id,
            messages: self.messages.clone(),
        }
    }

    fn trim_to_max(&mut self) {
        if self.messages.len() <= self.max_items {
            return;
        }

        let excess = self.messages.len() - self.max_items;
        self.messages.drain(0..excess);
    }
}

/// Clamp a requested page size against safety and server caps.
///
/// The result is always in `1..=100`.
pub fn bounded_page_size(requested: u16, server_cap: u16) -> u16 {
    let safe_requested = requested.max(1);
    let safe_cap = server_cap.max(1);
    safe_requested.min(safe_cap).min(100)
}
