//! Event reducer for `swoon-console`.
//!
//! Backend events update the state and yield the lines to print. Rendering is
//! kept here, free of I/O, so the transcript format can be tested.

use std::collections::{HashMap, HashSet};

use backend_core::{
    ActivityItem, BackendEvent, BackendLifecycleState, IdentityResolution, MemberProfile,
    MemberSummary, Message, PollStatus, ProfileTarget, SendAck, ThreadId, ThreadSnapshot,
    ThreadSummary, UserId,
};
use chrono::{DateTime, Local, Utc};
use tracing::{debug, trace, warn};

const DEFAULT_STATUS: &str = "Idle";

/// Thread list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadView {
    pub thread_id: ThreadId,
    pub title: String,
    pub preview: Option<String>,
    pub unread_count: u64,
    pub is_selected: bool,
}

/// Timeline row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub local_key: String,
    pub sender: String,
    pub body: String,
    pub time: String,
    pub is_own: bool,
    pub is_pending: bool,
}

/// Mutable console state fed by backend events and user input.
#[derive(Debug, Clone)]
pub struct ConsoleState {
    account_label: Option<String>,
    threads: Vec<ThreadView>,
    selected_thread: Option<ThreadId>,
    timelines: HashMap<ThreadId, ThreadSnapshot>,
    unhealthy_threads: HashSet<ThreadId>,
    names: HashMap<UserId, String>,
    status_text: String,
    error_text: Option<String>,
    compose_restore: Option<String>,
}

impl Default for ConsoleState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleState {
    pub fn new() -> Self {
        Self {
            account_label: None,
            threads: Vec::new(),
            selected_thread: None,
            timelines: HashMap::new(),
            unhealthy_threads: HashSet::new(),
            names: HashMap::new(),
            status_text: DEFAULT_STATUS.to_owned(),
            error_text: None,
            compose_restore: None,
        }
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn error_text(&self) -> Option<&str> {
        self.error_text.as_deref()
    }

    /// Summary printed by `/status`.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![match &self.account_label {
            Some(label) => format!("{}, logged in as {label}", self.status_text()),
            None => format!("{}, not logged in", self.status_text()),
        }];
        lines.push(format!("{} conversation(s) listed", self.threads().len()));
        if let Some(thread_id) = self.selected_thread {
            lines.push(format!("open: #{thread_id}"));
        }
        if let Some(error) = self.error_text() {
            lines.push(format!("last error: {error}"));
        }
        lines
    }

    pub fn threads(&self) -> &[ThreadView] {
        &self.threads
    }

    pub fn selected_thread(&self) -> Option<ThreadId> {
        self.selected_thread
    }

    #[cfg(test)]
    fn is_logged_in(&self) -> bool {
        self.account_label.is_some()
    }

    /// Take the body of the last failed send, if any.
    pub fn take_compose_restore(&mut self) -> Option<String> {
        self.compose_restore.take()
    }

    /// Put back a body taken with [`Self::take_compose_restore`] that could
    /// not be sent.
    pub fn restore_compose(&mut self, body: String) {
        self.compose_restore = Some(body);
    }

    pub fn clear_error(&mut self) {
        self.error_text = None;
    }

    /// Select a thread for sending. Returns the previously selected thread.
    pub fn select_thread(&mut self, thread_id: ThreadId) -> Option<ThreadId> {
        debug!(thread_id, "state selected thread");
        let previous = self.selected_thread.replace(thread_id);
        for thread in &mut self.threads {
            thread.is_selected = thread.thread_id == thread_id;
        }
        previous.filter(|previous| *previous != thread_id)
    }

    pub fn clear_selection(&mut self) -> Option<ThreadId> {
        for thread in &mut self.threads {
            thread.is_selected = false;
        }
        self.selected_thread.take()
    }

    /// Rendered timeline of the selected thread.
    pub fn visible_messages(&self) -> Vec<MessageView> {
        self.selected_thread
            .and_then(|thread_id| self.timelines.get(&thread_id))
            .map(|snapshot| {
                snapshot
                    .messages
                    .iter()
                    .map(|message| self.message_view(message, snapshot.current_user_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Feed one backend event into the reducer and return the lines to print.
    pub fn handle_backend_event(&mut self, event: BackendEvent) -> Vec<String> {
        match event {
            BackendEvent::StateChanged { state } => {
                self.status_text = lifecycle_label(state).to_owned();
                if state == BackendLifecycleState::LoggedOut {
                    self.reset_session_view();
                }
                vec![format!("-- {}", self.status_text)]
            }
            BackendEvent::AuthResult {
                success,
                error_code,
                profile,
            } => {
                if success {
                    let label = profile
                        .as_ref()
                        .map(|profile| profile.label().to_owned())
                        .unwrap_or_else(|| "account".to_owned());
                    self.account_label = Some(label.clone());
                    self.clear_error();
                    vec![format!("Logged in as {label}.")]
                } else {
                    let code = error_code.unwrap_or_else(|| "unknown".to_owned());
                    let text = auth_error_text(&code);
                    self.error_text = Some(text.clone());
                    vec![text]
                }
            }
            BackendEvent::ThreadListUpdated { threads } => {
                self.replace_threads(threads);
                self.render_thread_list()
            }
            BackendEvent::ThreadSnapshot(snapshot) => self.apply_snapshot(snapshot),
            BackendEvent::ThreadLoadFailed {
                thread_id,
                error_code,
                message,
            } => {
                warn!(thread_id, %error_code, %message, "thread load failed");
                let text = format!("Could not load thread #{thread_id} ({error_code}); retrying.");
                self.error_text = Some(text.clone());
                vec![text]
            }
            BackendEvent::ThreadClosed { thread_id } => {
                self.timelines.remove(&thread_id);
                self.unhealthy_threads.remove(&thread_id);
                if self.selected_thread == Some(thread_id) {
                    self.clear_selection();
                }
                vec![format!("-- closed thread #{thread_id}")]
            }
            BackendEvent::PollStatus(status) => self.apply_poll_status(status),
            BackendEvent::SendAck(ack) => self.handle_send_ack(ack),
            BackendEvent::ConversationStarted {
                recipient_id,
                thread_id,
                error_code,
            } => match (error_code, thread_id) {
                (Some(code), _) => {
                    let name = self.name_of(recipient_id);
                    let text = format!("Could not message {name} ({code}).");
                    self.error_text = Some(text.clone());
                    vec![text]
                }
                (None, Some(thread_id)) => vec![format!(
                    "Message sent to {}. Open it with /open {thread_id}.",
                    self.name_of(recipient_id)
                )],
                (None, None) => vec![format!(
                    "Message sent to {}. Run /threads to find the conversation.",
                    self.name_of(recipient_id)
                )],
            },
            BackendEvent::MembersLoaded { page, members } => {
                let mut lines = vec![format!("Members, page {page}:")];
                lines.extend(self.remember_members(&members));
                if members.is_empty() {
                    lines.push("  (no members)".to_owned());
                }
                lines
            }
            BackendEvent::MemberLoaded { member } => self.remember_members(&[member]),
            BackendEvent::MatchesLoaded { matches } => {
                let mut lines = vec!["Matches:".to_owned()];
                lines.extend(self.remember_members(&matches));
                if matches.is_empty() {
                    lines.push("  (no matches yet)".to_owned());
                }
                lines
            }
            BackendEvent::ActivityLoaded { page, items } => render_activity(page, &items),
            BackendEvent::ProfileLoaded { user, profile } => self.render_profile(user, profile),
            BackendEvent::SessionExpired => {
                self.status_text = "Session expired".to_owned();
                self.error_text = Some("session expired".to_owned());
                vec!["Session expired; log in again with /login <user> <password>.".to_owned()]
            }
            BackendEvent::FatalError { code, message, .. } => {
                warn!(%code, %message, "backend error surfaced to state");
                let text = format!("{code}: {message}");
                self.error_text = Some(text.clone());
                vec![format!("error: {text}")]
            }
        }
    }

    pub fn render_thread_list(&self) -> Vec<String> {
        if self.threads.is_empty() {
            return vec!["No conversations yet.".to_owned()];
        }
        self.threads
            .iter()
            .map(|thread| {
                let marker = if thread.is_selected { '>' } else { ' ' };
                let unread = if thread.unread_count > 0 {
                    format!(" [{} new]", thread.unread_count)
                } else {
                    String::new()
                };
                let preview = thread
                    .preview
                    .as_deref()
                    .map(|preview| format!(": {}", truncate(preview, 60)))
                    .unwrap_or_default();
                format!("{marker} #{} {}{unread}{preview}", thread.thread_id, thread.title)
            })
            .collect()
    }

    fn replace_threads(&mut self, threads: Vec<ThreadSummary>) {
        let selected = self.selected_thread;
        self.threads = threads
            .into_iter()
            .map(|thread| ThreadView {
                is_selected: selected == Some(thread.thread_id),
                title: if thread.title.trim().is_empty() {
                    format!("Conversation #{}", thread.thread_id)
                } else {
                    thread.title
                },
                thread_id: thread.thread_id,
                preview: thread.last_message,
                unread_count: thread.unread_count,
            })
            .collect();
        debug!(thread_count = self.threads.len(), "thread list replaced");
    }

    /// Store the snapshot and print what changed in the selected thread:
    /// new rows and rows that went from pending to delivered.
    fn apply_snapshot(&mut self, snapshot: ThreadSnapshot) -> Vec<String> {
        let thread_id = snapshot.thread_id;
        trace!(thread_id, message_count = snapshot.messages.len(), "received thread snapshot");

        let previous = self.timelines.remove(&thread_id);
        let mut lines = Vec::new();
        if self.selected_thread == Some(thread_id) {
            if previous.is_none() {
                let title = snapshot
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("Conversation #{thread_id}"));
                lines.push(format!("== {title} =="));
            }
            let seen: HashMap<&str, bool> = previous
                .iter()
                .flat_map(|previous| previous.messages.iter())
                .map(|message| (message.local_key.as_str(), message.is_pending()))
                .collect();
            for message in &snapshot.messages {
                let changed = match seen.get(message.local_key.as_str()) {
                    None => true,
                    Some(was_pending) => *was_pending && !message.is_pending(),
                };
                if changed {
                    lines.push(format_message(
                        &self.message_view(message, snapshot.current_user_id),
                    ));
                }
            }
        }

        self.timelines.insert(thread_id, snapshot);
        lines
    }

    fn apply_poll_status(&mut self, status: PollStatus) -> Vec<String> {
        let PollStatus {
            thread_id,
            healthy,
            lag_hint_ms,
        } = status;
        if healthy {
            self.status_text = "Connected".to_owned();
            if self.unhealthy_threads.remove(&thread_id) {
                return vec![format!("-- thread #{thread_id} is back online")];
            }
            return Vec::new();
        }

        self.status_text = match lag_hint_ms {
            Some(hint) => format!("Reconnecting (retry in {hint} ms)"),
            None => "Connection problem".to_owned(),
        };
        if self.unhealthy_threads.insert(thread_id) {
            vec![format!("-- thread #{thread_id}: {}", self.status_text)]
        } else {
            Vec::new()
        }
    }

    fn handle_send_ack(&mut self, ack: SendAck) -> Vec<String> {
        let Some(error_code) = ack.error_code else {
            debug!(local_key = %ack.local_key, "send acknowledgement succeeded");
            self.clear_error();
            return Vec::new();
        };

        warn!(
            local_key = %ack.local_key,
            error_code = %error_code,
            "send acknowledgement reported failure"
        );
        self.error_text = Some(format!("send failed ({error_code})"));
        let mut lines = vec![format!("Send failed ({error_code}).")];
        if let Some(body) = ack.restore_body.filter(|body| !body.is_empty()) {
            lines.push(format!("Unsent text kept, /retry sends it again: {body}"));
            self.compose_restore = Some(body);
        }
        lines
    }

    fn remember_members(&mut self, members: &[MemberSummary]) -> Vec<String> {
        members
            .iter()
            .map(|member| {
                self.names.insert(member.user_id, member.name.clone());
                let active = member
                    .last_active
                    .as_deref()
                    .map(|active| format!(" (active {active})"))
                    .unwrap_or_default();
                format!("  @{} {}{active}", member.user_id, member.name)
            })
            .collect()
    }

    fn render_profile(&mut self, user: ProfileTarget, profile: MemberProfile) -> Vec<String> {
        let MemberProfile { member, groups } = profile;
        self.names.insert(member.user_id, member.name.clone());

        let you = if user == ProfileTarget::Me { " (you)" } else { "" };
        let mut lines = vec![format!("== @{} {}{you} ==", member.user_id, member.name)];
        if let Some(active) = member.last_active {
            lines.push(format!("  active {active}"));
        }
        for group in groups.iter().filter(|group| !group.fields.is_empty()) {
            lines.push(format!("  {}:", group.name));
            lines.extend(
                group
                    .fields
                    .iter()
                    .map(|field| format!("    {}: {}", field.name, field.value)),
            );
        }
        if groups.iter().all(|group| group.fields.is_empty()) {
            lines.push("  (no profile details)".to_owned());
        }
        lines
    }

    fn message_view(&self, message: &Message, current_user_id: Option<UserId>) -> MessageView {
        // Pending rows were typed here even when the account id is unknown.
        let is_own = message.is_pending()
            || current_user_id
                .map_or(IdentityResolution::Unresolved, IdentityResolution::Account)
                .is_mine(message.sender_id);
        let sender = if is_own {
            "me".to_owned()
        } else {
            message
                .sender_id
                .map(|sender_id| self.name_of(sender_id))
                .unwrap_or_else(|| "unknown".to_owned())
        };
        MessageView {
            local_key: message.local_key.clone(),
            sender,
            body: message.body.clone(),
            time: format_time(message.timestamp_ms),
            is_own,
            is_pending: message.is_pending(),
        }
    }

    fn name_of(&self, user_id: UserId) -> String {
        self.names
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| format!("#{user_id}"))
    }

    fn reset_session_view(&mut self) {
        self.account_label = None;
        self.threads.clear();
        self.selected_thread = None;
        self.timelines.clear();
        self.unhealthy_threads.clear();
    }
}

pub fn format_message(view: &MessageView) -> String {
    let state = if view.is_pending { " (sending)" } else { "" };
    format!("[{}] {}: {}{state}", view.time, view.sender, view.body)
}

fn render_activity(page: u32, items: &[ActivityItem]) -> Vec<String> {
    let mut lines = vec![format!("Activity, page {page}:")];
    for item in items {
        let date = item
            .timestamp_ms
            .and_then(|timestamp_ms| format_local(timestamp_ms, "%Y-%m-%d"))
            .unwrap_or_else(|| "----------".to_owned());
        lines.push(format!("  [{date}] {}", item.title));
        if !item.content.is_empty() {
            lines.push(format!("    {}", truncate(&item.content, 120)));
        }
    }
    if items.is_empty() {
        lines.push("  (no activity)".to_owned());
    }
    lines
}

fn format_time(timestamp_ms: u64) -> String {
    format_local(timestamp_ms, "%H:%M").unwrap_or_else(|| "--:--".to_owned())
}

fn format_local(timestamp_ms: u64, pattern: &str) -> Option<String> {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|time| time.with_timezone(&Local).format(pattern).to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn lifecycle_label(state: BackendLifecycleState) -> &'static str {
    match state {
        BackendLifecycleState::Cold => "Cold",
        BackendLifecycleState::Configured => "Configured",
        BackendLifecycleState::Authenticating => "Authenticating",
        BackendLifecycleState::Authenticated => "Authenticated",
        BackendLifecycleState::LoggedOut => "Logged out",
    }
}

fn auth_error_text(code: &str) -> String {
    match code {
        "invalid_credentials" => "Login failed: wrong username or password.".to_owned(),
        "session_not_found" => "No saved session; log in with /login <user> <password>.".to_owned(),
        other => format!("Login failed ({other})."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_core::{AccountProfile, MessageState};

    fn confirmed(id: u64, sender: u64, body: &str, ts: u64) -> Message {
        Message::confirmed(id, 7, Some(sender), body, ts)
    }

    fn pending(local_key: &str, sender: Option<u64>, body: &str, ts: u64) -> Message {
        Message {
            id: None,
            local_key: local_key.to_owned(),
            thread_id: 7,
            sender_id: sender,
            body: body.to_owned(),
            timestamp_ms: ts,
            state: MessageState::Pending,
            expires_at_ms: Some(ts + 60_000),
            client_token: None,
        }
    }

    fn snapshot(current_user_id: Option<u64>, messages: Vec<Message>) -> ThreadSnapshot {
        ThreadSnapshot {
            thread_id: 7,
            title: Some("Artur".to_owned()),
            current_user_id,
            messages,
        }
    }

    fn thread(thread_id: u64, title: &str, unread: u64) -> ThreadSummary {
        ThreadSummary {
            thread_id,
            title: title.to_owned(),
            participants: vec![1, 335],
            last_message: Some("Cześć".to_owned()),
            last_activity_ms: None,
            unread_count: unread,
        }
    }

    #[test]
    fn thread_list_keeps_backend_order_and_marks_selection() {
        let mut state = ConsoleState::new();
        state.select_thread(8);
        let lines = state.handle_backend_event(BackendEvent::ThreadListUpdated {
            threads: vec![thread(7, "Artur", 2), thread(8, "", 0)],
        });

        assert_eq!(state.threads()[0].thread_id, 7);
        assert!(state.threads()[1].is_selected);
        assert_eq!(lines[0], "  #7 Artur [2 new]: Cześć");
        assert_eq!(lines[1], "> #8 Conversation #8: Cześć");
    }

    #[test]
    fn own_messages_need_a_resolved_identity() {
        let mut state = ConsoleState::new();
        state.select_thread(7);
        state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            Some(335),
            vec![confirmed(1, 1, "hej", 1_000), confirmed(2, 335, "hi", 2_000)],
        )));
        let visible = state.visible_messages();
        assert!(!visible[0].is_own);
        assert!(visible[1].is_own);
        assert_eq!(visible[1].sender, "me");

        state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            None,
            vec![confirmed(2, 335, "hi", 2_000)],
        )));
        let visible = state.visible_messages();
        assert!(!visible[0].is_own);
        assert_eq!(visible[0].sender, "#335");
    }

    #[test]
    fn pending_rows_are_own_without_resolved_identity() {
        let mut state = ConsoleState::new();
        state.select_thread(7);
        let lines = state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            None,
            vec![pending("local-a-1", None, "Hello", 2_000)],
        )));
        assert!(lines[1].ends_with("me: Hello (sending)"));

        let mut delivered = confirmed(9, 335, "Hello", 2_100);
        delivered.local_key = "local-a-1".to_owned();
        let lines = state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            None,
            vec![delivered],
        )));
        assert!(lines[0].ends_with("#335: Hello"));
    }

    #[test]
    fn snapshots_print_only_new_and_delivered_rows() {
        let mut state = ConsoleState::new();
        state.select_thread(7);

        let first = state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            Some(335),
            vec![confirmed(1, 1, "hej", 1_000)],
        )));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], "== Artur ==");

        let sending = state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            Some(335),
            vec![
                confirmed(1, 1, "hej", 1_000),
                pending("local-a-1", Some(335), "Hello", 2_000),
            ],
        )));
        assert_eq!(sending.len(), 1);
        assert!(sending[0].ends_with("me: Hello (sending)"));

        let mut delivered = confirmed(9, 335, "Hello", 2_100);
        delivered.local_key = "local-a-1".to_owned();
        let confirmed_lines = state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            Some(335),
            vec![confirmed(1, 1, "hej", 1_000), delivered],
        )));
        assert_eq!(confirmed_lines.len(), 1);
        assert!(confirmed_lines[0].ends_with("me: Hello"));

        let unchanged = state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            Some(335),
            vec![confirmed(1, 1, "hej", 1_000)],
        )));
        assert!(unchanged.is_empty());
    }

    #[test]
    fn snapshots_for_background_threads_are_stored_silently() {
        let mut state = ConsoleState::new();
        let lines = state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            Some(335),
            vec![confirmed(1, 1, "hej", 1_000)],
        )));
        assert!(lines.is_empty());

        state.select_thread(7);
        assert_eq!(state.visible_messages().len(), 1);
    }

    #[test]
    fn send_failure_restores_compose_text() {
        let mut state = ConsoleState::new();
        let lines = state.handle_backend_event(BackendEvent::SendAck(SendAck {
            thread_id: 7,
            local_key: "local-a-1".to_owned(),
            accepted: false,
            error_code: Some("connection_failed".to_owned()),
            restore_body: Some("Hello".to_owned()),
        }));

        assert_eq!(lines[0], "Send failed (connection_failed).");
        assert_eq!(state.error_text(), Some("send failed (connection_failed)"));
        assert_eq!(state.take_compose_restore().as_deref(), Some("Hello"));
        assert_eq!(state.take_compose_restore(), None);
    }

    #[test]
    fn poll_status_reports_transitions_once() {
        let mut state = ConsoleState::new();
        let unhealthy = PollStatus {
            thread_id: 7,
            healthy: false,
            lag_hint_ms: Some(10_000),
        };
        let lines = state.handle_backend_event(BackendEvent::PollStatus(unhealthy.clone()));
        assert_eq!(lines, vec!["-- thread #7: Reconnecting (retry in 10000 ms)"]);
        assert!(
            state
                .handle_backend_event(BackendEvent::PollStatus(unhealthy))
                .is_empty()
        );

        let lines = state.handle_backend_event(BackendEvent::PollStatus(PollStatus {
            thread_id: 7,
            healthy: true,
            lag_hint_ms: None,
        }));
        assert_eq!(lines, vec!["-- thread #7 is back online"]);
        assert_eq!(state.status_text(), "Connected");
    }

    #[test]
    fn member_names_label_later_messages() {
        let mut state = ConsoleState::new();
        state.handle_backend_event(BackendEvent::MatchesLoaded {
            matches: vec![MemberSummary {
                user_id: 1,
                name: "Artur".to_owned(),
                slug: Some("artur".to_owned()),
                avatar: None,
                last_active: Some("2 hours ago".to_owned()),
            }],
        });
        state.select_thread(7);
        state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            Some(335),
            vec![confirmed(1, 1, "hej", 1_000)],
        )));
        assert_eq!(state.visible_messages()[0].sender, "Artur");
    }

    #[test]
    fn activity_lists_titles_and_trimmed_content() {
        let mut state = ConsoleState::new();
        let lines = state.handle_backend_event(BackendEvent::ActivityLoaded {
            page: 2,
            items: vec![
                ActivityItem {
                    id: 91,
                    user_id: Some(1),
                    title: "Artur posted an update".to_owned(),
                    content: "x".repeat(130),
                    timestamp_ms: None,
                    avatar: None,
                },
                ActivityItem {
                    id: 92,
                    user_id: Some(335),
                    title: "Aneta joined".to_owned(),
                    content: String::new(),
                    timestamp_ms: None,
                    avatar: None,
                },
            ],
        });

        assert_eq!(lines[0], "Activity, page 2:");
        assert_eq!(lines[1], "  [----------] Artur posted an update");
        assert_eq!(lines[2], format!("    {}...", "x".repeat(120)));
        assert_eq!(lines[3], "  [----------] Aneta joined");
        assert_eq!(lines.len(), 4);

        let empty = state.handle_backend_event(BackendEvent::ActivityLoaded {
            page: 1,
            items: Vec::new(),
        });
        assert_eq!(empty, vec!["Activity, page 1:", "  (no activity)"]);
    }

    #[test]
    fn profile_prints_groups_and_remembers_name() {
        let mut state = ConsoleState::new();
        let lines = state.handle_backend_event(BackendEvent::ProfileLoaded {
            user: ProfileTarget::Me,
            profile: MemberProfile {
                member: MemberSummary {
                    user_id: 335,
                    name: "Aneta".to_owned(),
                    slug: None,
                    avatar: None,
                    last_active: Some("now".to_owned()),
                },
                groups: vec![
                    backend_core::ProfileGroup {
                        name: "Base".to_owned(),
                        fields: vec![backend_core::ProfileField {
                            name: "City".to_owned(),
                            value: "Kraków".to_owned(),
                        }],
                    },
                    backend_core::ProfileGroup {
                        name: "Hidden".to_owned(),
                        fields: Vec::new(),
                    },
                ],
            },
        });

        assert_eq!(
            lines,
            vec![
                "== @335 Aneta (you) ==",
                "  active now",
                "  Base:",
                "    City: Kraków",
            ]
        );

        state.select_thread(7);
        state.handle_backend_event(BackendEvent::ThreadSnapshot(snapshot(
            None,
            vec![confirmed(1, 335, "hej", 1_000)],
        )));
        assert_eq!(state.visible_messages()[0].sender, "Aneta");
    }

    #[test]
    fn logout_resets_session_view() {
        let mut state = ConsoleState::new();
        state.handle_backend_event(BackendEvent::AuthResult {
            success: true,
            error_code: None,
            profile: Some(AccountProfile {
                username: "aneta".to_owned(),
                display_name: Some("Aneta".to_owned()),
                ..AccountProfile::default()
            }),
        });
        assert!(state.is_logged_in());
        state.select_thread(7);

        let lines = state.handle_backend_event(BackendEvent::StateChanged {
            state: BackendLifecycleState::LoggedOut,
        });
        assert_eq!(lines, vec!["-- Logged out"]);
        assert!(!state.is_logged_in());
        assert_eq!(state.selected_thread(), None);
    }

    #[test]
    fn status_lines_summarize_session() {
        let mut state = ConsoleState::new();
        state.handle_backend_event(BackendEvent::FatalError {
            code: "thread_not_open".to_owned(),
            message: "thread 9 is not open".to_owned(),
            recoverable: false,
        });
        assert_eq!(
            state.status_lines(),
            vec![
                "Idle, not logged in",
                "0 conversation(s) listed",
                "last error: thread_not_open: thread 9 is not open",
            ]
        );
    }

    #[test]
    fn auth_failures_are_actionable() {
        let mut state = ConsoleState::new();
        let lines = state.handle_backend_event(BackendEvent::AuthResult {
            success: false,
            error_code: Some("invalid_credentials".to_owned()),
            profile: None,
        });
        assert_eq!(lines, vec!["Login failed: wrong username or password."]);
    }

    #[test]
    fn truncates_long_previews() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
        assert_eq!(truncate("zażółć", 4), "zażó...");
    }
}
