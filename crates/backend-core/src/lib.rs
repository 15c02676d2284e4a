//! Core messaging contract shared between the runtime and frontend consumers.
//!
//! This crate defines the command/event protocol and lifecycle model, the
//! message normalizer for the two WordPress messaging APIs, identity
//! resolution, the optimistic send tracker, and the reconciliation engine that
//! merges local and server message sets. It performs no I/O of its own; the
//! poller reads through the [`polling::MessageSource`] trait.

/// Async command/event channel primitives.
pub mod channel;
/// Stable backend error types and HTTP classification helpers.
pub mod error;
/// Which roster entry is the logged-in account.
pub mod identity;
/// Raw record shapes into canonical messages, threads and acknowledgements.
pub mod normalization;
/// Provisional message creation and bookkeeping.
pub mod optimistic;
/// Interval/refresh driven fetch-and-merge loop.
pub mod polling;
/// Merge of local and fetched message sets.
pub mod reconcile;
/// Backoff policy used by retry loops.
pub mod retry;
/// Backend lifecycle state machine.
pub mod state_machine;
/// Per-thread displayed message set.
pub mod timeline;
/// Frontend-facing protocol types (commands, events, payloads).
pub mod types;
/// Raw JSON record shapes.
pub mod wire;

pub use channel::{
    BackendChannelError, BackendChannels, DEFAULT_COMMAND_BUFFER, DEFAULT_EVENT_BUFFER, EventSink,
    EventStream, next_event,
};
pub use error::{BackendError, BackendErrorCategory, INVALID_TOKEN_CODE};
pub use identity::{IdentityResolution, resolve_current_user};
pub use normalization::{
    SendOutcome, ThreadPage, body_match_key, classify_send_error_message, normalize_send_outcome,
    strip_html,
};
pub use optimistic::{DEFAULT_PENDING_TTL_MS, SendTracker};
pub use polling::{
    DEFAULT_POLL_INTERVAL_MS, MessageSource, PollHandle, PollerConfig, SharedTimeline,
    spawn_poller,
};
pub use reconcile::{ConfirmationMatcher, ContentMatcher, Reconciler, TokenOrContentMatcher};
pub use retry::RetryPolicy;
pub use state_machine::BackendStateMachine;
pub use timeline::{ThreadTimeline, TimelineMergeError, bounded_page_size};
pub use types::{
    AccountProfile, ActivityItem, BackendCommand, BackendEvent, BackendInitConfig,
    BackendLifecycleState, MemberProfile, MemberSummary, Message, MessageId, MessageIdentity,
    MessageState, PollStatus, ProfileField, ProfileGroup, ProfileTarget, RosterEntry, SendAck,
    ThreadId, ThreadSnapshot, ThreadSummary, UserId, unix_now_ms,
};
