use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer conversation identifier used by both Better Messages and BuddyPress.
pub type ThreadId = u64;
/// Numeric WordPress user identifier.
pub type UserId = u64;
/// Server-assigned message identifier.
pub type MessageId = u64;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// High-level backend lifecycle state reported to the frontend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendLifecycleState {
    /// Backend has not been initialized yet.
    Cold,
    /// Backend has accepted `Init` and knows its base URL.
    Configured,
    /// A login or session restore flow is currently running.
    Authenticating,
    /// A bearer token is held and thread/member commands are accepted.
    Authenticated,
    /// Backend logged out and cleared the session.
    LoggedOut,
}

/// Delivery state of a message in a thread timeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// Created locally, not yet observed in a server fetch.
    Pending,
    /// Observed in a server fetch.
    Confirmed,
}

/// Canonical message shape shared by normalizer, reconciler and frontends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server id once confirmed.
    pub id: Option<MessageId>,
    /// Client-side key, stable across confirmation.
    pub local_key: String,
    pub thread_id: ThreadId,
    /// Author of the message. `None` when neither the record nor identity
    /// resolution could name one.
    pub sender_id: Option<UserId>,
    /// Plain-text body with markup removed.
    pub body: String,
    /// Milliseconds since Unix epoch.
    pub timestamp_ms: u64,
    pub state: MessageState,
    /// Eviction deadline for pending messages.
    pub expires_at_ms: Option<u64>,
    /// Correlation token echoed back by the server, when it does so.
    pub client_token: Option<String>,
}

/// Identity used for deduplication: server id when known, local key otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageIdentity<'a> {
    Server(MessageId),
    Local(&'a str),
}

impl Message {
    /// Build a server-observed message. `local_key` is derived from the id.
    pub fn confirmed(
        id: MessageId,
        thread_id: ThreadId,
        sender_id: Option<UserId>,
        body: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: Some(id),
            local_key: server_local_key(id),
            thread_id,
            sender_id,
            body: body.into(),
            timestamp_ms,
            state: MessageState::Confirmed,
            expires_at_ms: None,
            client_token: None,
        }
    }

    pub fn identity(&self) -> MessageIdentity<'_> {
        match self.id {
            Some(id) if self.state == MessageState::Confirmed => MessageIdentity::Server(id),
            _ => MessageIdentity::Local(&self.local_key),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == MessageState::Pending
    }

    /// Pending message whose deadline has strictly passed.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.is_pending()
            && self
                .expires_at_ms
                .is_some_and(|expires_at| now_ms > expires_at)
    }
}

/// Local key assigned to messages first seen on the server.
pub fn server_local_key(id: MessageId) -> String {
    format!("srv-{id}")
}

/// Profile fields returned by the token endpoint for the logged-in account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountProfile {
    /// Numeric id, only present on some token endpoint configurations.
    pub user_id: Option<UserId>,
    pub username: String,
    pub email: Option<String>,
    pub nicename: Option<String>,
    pub display_name: Option<String>,
}

impl AccountProfile {
    /// Best label for the account in logs and console output.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.nicename.as_deref())
            .unwrap_or(&self.username)
    }
}

/// Participant record delivered alongside thread listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    pub user_id: UserId,
    pub name: String,
    pub slug: Option<String>,
    pub avatar: Option<String>,
}

/// Thread metadata for conversation lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    /// Non-self participant names, falling back to subject.
    pub title: String,
    pub participants: Vec<UserId>,
    /// Plain-text preview of the newest known message.
    pub last_message: Option<String>,
    pub last_activity_ms: Option<u64>,
    pub unread_count: u64,
}

/// Member directory row (also used for matches).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberSummary {
    pub user_id: UserId,
    pub name: String,
    pub slug: Option<String>,
    pub avatar: Option<String>,
    /// Human-readable last activity string as provided by BuddyPress.
    pub last_active: Option<String>,
}

/// Whose profile `GetProfile` loads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProfileTarget {
    /// The logged-in account, as the server resolves the bearer token.
    Me,
    User(UserId),
}

impl fmt::Display for ProfileTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Me => f.write_str("me"),
            Self::User(user_id) => write!(f, "{user_id}"),
        }
    }
}

/// Extended-profile field. Only fields with a value are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileGroup {
    pub name: String,
    pub fields: Vec<ProfileField>,
}

/// Member card plus extended-profile groups.
///
/// `groups` is empty when the extended-profile component is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberProfile {
    pub member: MemberSummary,
    pub groups: Vec<ProfileGroup>,
}

/// Site-wide activity stream entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityItem {
    pub id: u64,
    pub user_id: Option<UserId>,
    /// Plain-text headline, for example "Aneta posted an update".
    pub title: String,
    /// Plain-text body, empty for headline-only items.
    pub content: String,
    /// `None` when the item carried no parseable date.
    pub timestamp_ms: Option<u64>,
    pub avatar: Option<String>,
}

/// Optional runtime tuning values supplied with `BackendCommand::Init`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BackendInitConfig {
    /// Poll interval for open threads. Defaults to 5 s.
    pub poll_interval_ms: Option<u64>,
    /// Lifetime of unconfirmed provisional messages. Defaults to 60 s.
    pub pending_ttl_ms: Option<u64>,
    /// `per_page` used when fetching the thread listing.
    pub thread_page_size: Option<u16>,
    /// Per-request HTTP timeout.
    pub request_timeout_ms: Option<u64>,
    /// Cap on messages kept per open thread.
    pub timeline_max_items: Option<usize>,
}

/// Command channel input accepted by the backend runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendCommand {
    /// Initialize backend against a WordPress REST root.
    Init {
        /// REST root, for example `https://example.org/wp-json`.
        base_url: String,
        /// Optional runtime tuning overrides.
        config: Option<BackendInitConfig>,
    },
    /// Exchange username/password for a bearer token.
    LoginPassword { username: String, password: String },
    /// Attempt session restore from the persisted token.
    RestoreSession,
    /// Emit the latest thread list.
    ListThreads,
    /// Load a thread and start polling it.
    OpenThread { thread_id: ThreadId },
    /// Force an immediate poll of an open thread (screen focus).
    RefreshThread { thread_id: ThreadId },
    /// Stop polling a thread and drop its timeline.
    CloseThread { thread_id: ThreadId },
    /// Send a reply into an open thread.
    SendMessage { thread_id: ThreadId, body: String },
    /// Send a first message to a member, creating the thread if needed.
    StartConversation {
        recipient_id: UserId,
        subject: Option<String>,
        body: String,
    },
    /// Load one page of the member directory.
    ListMembers {
        page: u32,
        per_page: u16,
        search: Option<String>,
    },
    /// Load one member profile.
    GetMember { user_id: UserId },
    /// Load the account's matches.
    ListMatches,
    /// Load one page of the site activity stream.
    ListActivity { page: u32, per_page: u16 },
    /// Load a member card together with its extended profile.
    GetProfile { user: ProfileTarget },
    /// Stop all pollers and clear the persisted session.
    Logout,
}

/// Full timeline replacement for an open thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub thread_id: ThreadId,
    pub title: Option<String>,
    /// Resolved id of the logged-in account, `None` when resolution failed.
    pub current_user_id: Option<UserId>,
    /// Messages in display order.
    pub messages: Vec<Message>,
}

/// Poller health for an open thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollStatus {
    pub thread_id: ThreadId,
    /// Whether the last fetch succeeded.
    pub healthy: bool,
    /// Delay before the next attempt when it differs from the interval.
    pub lag_hint_ms: Option<u64>,
}

/// Acknowledgement for `SendMessage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    pub thread_id: ThreadId,
    /// Local key of the provisional message.
    pub local_key: String,
    /// Whether the server accepted the send.
    pub accepted: bool,
    /// Stable backend error code on failure.
    pub error_code: Option<String>,
    /// Compose text to put back into the input after a failure.
    pub restore_body: Option<String>,
}

/// Event channel output emitted by backend runtime and pollers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendEvent {
    /// Backend lifecycle transition.
    StateChanged { state: BackendLifecycleState },
    /// Result of login/session-restore flow.
    AuthResult {
        success: bool,
        error_code: Option<String>,
        profile: Option<AccountProfile>,
    },
    /// Full thread list replacement.
    ThreadListUpdated { threads: Vec<ThreadSummary> },
    /// Timeline replacement for an open thread.
    ThreadSnapshot(ThreadSnapshot),
    /// The initial load of a thread failed.
    ThreadLoadFailed {
        thread_id: ThreadId,
        error_code: String,
        message: String,
    },
    /// A thread was closed and its poller stopped.
    ThreadClosed { thread_id: ThreadId },
    /// Poller health update.
    PollStatus(PollStatus),
    /// Send acknowledgement.
    SendAck(SendAck),
    /// Result of `StartConversation`.
    ConversationStarted {
        recipient_id: UserId,
        thread_id: Option<ThreadId>,
        error_code: Option<String>,
    },
    /// One page of the member directory.
    MembersLoaded {
        page: u32,
        members: Vec<MemberSummary>,
    },
    /// One member profile.
    MemberLoaded { member: MemberSummary },
    /// The account's matches.
    MatchesLoaded { matches: Vec<MemberSummary> },
    /// One page of the activity stream.
    ActivityLoaded { page: u32, items: Vec<ActivityItem> },
    /// Result of `GetProfile`.
    ProfileLoaded {
        user: ProfileTarget,
        profile: MemberProfile,
    },
    /// The server rejected the bearer token; a new login is required.
    SessionExpired,
    /// Command failure that was not reported through a dedicated event.
    FatalError {
        code: String,
        message: String,
        recoverable: bool,
    },
}

impl BackendCommand {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::LoginPassword { .. } => "login_password",
            Self::RestoreSession => "restore_session",
            Self::ListThreads => "list_threads",
            Self::OpenThread { .. } => "open_thread",
            Self::RefreshThread { .. } => "refresh_thread",
            Self::CloseThread { .. } => "close_thread",
            Self::SendMessage { .. } => "send_message",
            Self::StartConversation { .. } => "start_conversation",
            Self::ListMembers { .. } => "list_members",
            Self::GetMember { .. } => "get_member",
            Self::ListMatches => "list_matches",
            Self::ListActivity { .. } => "list_activity",
            Self::GetProfile { .. } => "get_profile",
            Self::Logout => "logout",
        }
    }
}

impl BackendEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::AuthResult { .. } => "auth_result",
            Self::ThreadListUpdated { .. } => "thread_list_updated",
            Self::ThreadSnapshot(_) => "thread_snapshot",
            Self::ThreadLoadFailed { .. } => "thread_load_failed",
            Self::ThreadClosed { .. } => "thread_closed",
            Self::PollStatus(_) => "poll_status",
            Self::SendAck(_) => "send_ack",
            Self::ConversationStarted { .. } => "conversation_started",
            Self::MembersLoaded { .. } => "members_loaded",
            Self::MemberLoaded { .. } => "member_loaded",
            Self::MatchesLoaded { .. } => "matches_loaded",
            Self::ActivityLoaded { .. } => "activity_loaded",
            Self::ProfileLoaded { .. } => "profile_loaded",
            Self::SessionExpired => "session_expired",
            Self::FatalError { .. } => "fatal_error",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Confirmed => f.write_str("confirmed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_messages_use_server_identity() {
        let msg = Message::confirmed(99, 7, Some(1), "hi", 1_000);
        assert_eq!(msg.identity(), MessageIdentity::Server(99));
        assert_eq!(msg.local_key, "srv-99");
        assert!(!msg.is_pending());
    }

    #[test]
    fn pending_messages_use_local_identity_and_expire_strictly_after_deadline() {
        let msg = Message {
            id: None,
            local_key: "local-a-1".into(),
            thread_id: 7,
            sender_id: Some(1),
            body: "hi".into(),
            timestamp_ms: 1_000,
            state: MessageState::Pending,
            expires_at_ms: Some(61_000),
            client_token: None,
        };
        assert_eq!(msg.identity(), MessageIdentity::Local("local-a-1"));
        assert!(!msg.is_expired(61_000));
        assert!(msg.is_expired(61_001));
    }

    #[test]
    fn profile_target_renders_as_path_segment() {
        assert_eq!(ProfileTarget::Me.to_string(), "me");
        assert_eq!(ProfileTarget::User(335).to_string(), "335");
        assert_eq!(
            BackendCommand::GetProfile {
                user: ProfileTarget::Me
            }
            .kind(),
            "get_profile"
        );
    }

    #[test]
    fn account_label_prefers_display_name() {
        let mut profile = AccountProfile {
            username: "aneta".into(),
            ..AccountProfile::default()
        };
        assert_eq!(profile.label(), "aneta");
        profile.nicename = Some("aneta-k".into());
        assert_eq!(profile.label(), "aneta-k");
        profile.display_name = Some("Aneta".into());
        assert_eq!(profile.label(), "Aneta");
    }
}
