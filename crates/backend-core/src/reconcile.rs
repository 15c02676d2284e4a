//! Merge of locally held thread messages with a freshly fetched server set.
//!
//! The merge is a pure, total function. Its steps, in order:
//! 1. index incoming messages by server id (first occurrence wins)
//! 2. walk the current set: refresh confirmed entries from incoming, confirm
//!    pending entries through the [`ConfirmationMatcher`], evict expired ones
//! 3. append incoming messages nothing consumed
//! 4. drop later duplicates of the same identity
//! 5. stable sort by timestamp
//!
//! Confirmed entries missing from the incoming set are kept; a fetch only
//! covers a page of recent history. Confirmed entries without a server id
//! are recognised again by sender and body, since nothing else about them is
//! stable between fetches.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::{
    normalization::body_match_key,
    types::{Message, MessageId, MessageState, ThreadId},
};

/// Decides whether an incoming server message is the confirmed twin of a
/// pending local one.
pub trait ConfirmationMatcher: Send + Sync {
    fn matches(&self, pending: &Message, candidate: &Message) -> bool;
}

/// Same sender and same body after markup removal, trimming and case folding.
///
/// A pending message without a sender (identity unresolved) matches on body
/// alone and takes its sender from the server copy. This is a heuristic: two
/// identical messages sent in quick succession can confirm in either order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentMatcher;

impl ConfirmationMatcher for ContentMatcher {
    fn matches(&self, pending: &Message, candidate: &Message) -> bool {
        pending
            .sender_id
            .is_none_or(|sender| candidate.sender_id == Some(sender))
            && body_match_key(&pending.body) == body_match_key(&candidate.body)
    }
}

/// Uses the server-echoed client token when the candidate carries one and
/// falls back to content matching otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOrContentMatcher;

impl ConfirmationMatcher for TokenOrContentMatcher {
    fn matches(&self, pending: &Message, candidate: &Message) -> bool {
        match candidate.client_token.as_deref() {
            Some(token) => token == pending.local_key,
            None => ContentMatcher.matches(pending, candidate),
        }
    }
}

/// Thread-scoped merge engine.
#[derive(Debug, Clone, Default)]
pub struct Reconciler<M = ContentMatcher> {
    matcher: M,
}

impl Reconciler<ContentMatcher> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M: ConfirmationMatcher> Reconciler<M> {
    pub fn with_matcher(matcher: M) -> Self {
        Self { matcher }
    }

    /// Merge `incoming` into `current` for `thread_id`.
    ///
    /// Entries of other threads in either input are ignored.
    pub fn merge(
        &self,
        thread_id: ThreadId,
        current: &[Message],
        incoming: &[Message],
        now_ms: u64,
    ) -> Vec<Message> {
        let incoming: Vec<&Message> = incoming
            .iter()
            .filter(|message| message.thread_id == thread_id)
            .collect();

        let mut by_id: HashMap<MessageId, usize> = HashMap::new();
        for (idx, message) in incoming.iter().enumerate() {
            if let Some(id) = message.id {
                by_id.entry(id).or_insert(idx);
            }
        }

        // Ids already held as confirmed are never offered to pending matching.
        let known_ids: HashSet<MessageId> = current
            .iter()
            .filter(|message| message.thread_id == thread_id && !message.is_pending())
            .filter_map(|message| message.id)
            .collect();

        let mut consumed = vec![false; incoming.len()];

        // Id-less confirmed entries claim their incoming copies before pending
        // matching, so an old anonymous message never confirms a new send.
        for message in current
            .iter()
            .filter(|m| m.thread_id == thread_id && m.id.is_none() && !m.is_pending())
        {
            if let Some(idx) = incoming.iter().enumerate().position(|(idx, candidate)| {
                !consumed[idx] && candidate.id.is_none() && same_content(message, candidate)
            }) {
                consumed[idx] = true;
            }
        }

        let mut merged: Vec<Message> = Vec::with_capacity(current.len() + incoming.len());
        let mut evicted = 0usize;
        let mut confirmed = 0usize;

        for message in current.iter().filter(|m| m.thread_id == thread_id) {
            match message.state {
                MessageState::Confirmed => {
                    let refreshed = message.id.and_then(|id| by_id.get(&id).copied());
                    match refreshed {
                        Some(idx) => {
                            consume_all_with_id(&incoming, &mut consumed, message.id);
                            merged.push(accept(incoming[idx], &message.local_key));
                        }
                        None => merged.push(message.clone()),
                    }
                }
                MessageState::Pending => {
                    let twin = incoming.iter().enumerate().position(|(idx, candidate)| {
                        !consumed[idx]
                            && candidate.id.is_none_or(|id| !known_ids.contains(&id))
                            && self.matcher.matches(message, candidate)
                    });

                    match twin {
                        Some(idx) => {
                            consume_all_with_id(&incoming, &mut consumed, incoming[idx].id);
                            consumed[idx] = true;
                            trace!(
                                local_key = %message.local_key,
                                id = ?incoming[idx].id,
                                "pending message confirmed"
                            );
                            confirmed += 1;
                            merged.push(accept(incoming[idx], &message.local_key));
                        }
                        None if message.is_expired(now_ms) => {
                            trace!(local_key = %message.local_key, "pending message expired");
                            evicted += 1;
                        }
                        None => merged.push(message.clone()),
                    }
                }
            }
        }

        let mut appended = 0usize;
        for (idx, message) in incoming.iter().enumerate() {
            if !consumed[idx] {
                appended += 1;
                merged.push(accept(message, &message.local_key));
            }
        }

        let mut seen = HashSet::new();
        merged.retain(|message| seen.insert(identity_key(message)));
        merged.sort_by_key(|message| message.timestamp_ms);

        debug!(
            thread_id,
            confirmed,
            evicted,
            appended,
            total = merged.len(),
            "merged thread messages"
        );
        merged
    }
}

/// Owned form of [`Message::identity`] for the dedupe set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdentityKey {
    Server(MessageId),
    Local(String),
}

fn identity_key(message: &Message) -> IdentityKey {
    match message.identity() {
        crate::types::MessageIdentity::Server(id) => IdentityKey::Server(id),
        crate::types::MessageIdentity::Local(key) => IdentityKey::Local(key.to_owned()),
    }
}

fn same_content(held: &Message, candidate: &Message) -> bool {
    held.sender_id == candidate.sender_id
        && body_match_key(&held.body) == body_match_key(&candidate.body)
}

fn consume_all_with_id(incoming: &[&Message], consumed: &mut [bool], id: Option<MessageId>) {
    let Some(id) = id else {
        return;
    };
    for (idx, message) in incoming.iter().enumerate() {
        if message.id == Some(id) {
            consumed[idx] = true;
        }
    }
}

/// Incoming copy as a confirmed entry carrying the given local key.
fn accept(incoming: &Message, local_key: &str) -> Message {
    Message {
        local_key: local_key.to_owned(),
        state: MessageState::Confirmed,
        expires_at_ms: None,
        ..incoming.clone()
    }
}
