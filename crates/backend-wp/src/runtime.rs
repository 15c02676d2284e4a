//! Command/event runtime for the WordPress backend.
//!
//! The runtime owns the session, one timeline and poller per open thread, and
//! the optimistic send tracker. Commands are handled one at a time; pollers
//! run as separate tasks and publish straight to the event channel.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use backend_core::{
    BackendChannelError, BackendChannels, BackendCommand, BackendError, BackendErrorCategory,
    BackendEvent, BackendInitConfig, BackendStateMachine, ContentMatcher, DEFAULT_PENDING_TTL_MS,
    DEFAULT_POLL_INTERVAL_MS, EventStream, IdentityResolution, Message, MessageSource, PollHandle,
    PollerConfig, ProfileTarget, RetryPolicy, RosterEntry, SendOutcome, SendTracker,
    SharedTimeline, ThreadId, ThreadSummary, ThreadTimeline, TimelineMergeError, UserId,
    bounded_page_size, normalization::retitle_threads, normalize_send_outcome,
    resolve_current_user, spawn_poller, unix_now_ms,
};
use backend_platform::SecretStore;
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::{
    api::ChatApi,
    client::{DEFAULT_REQUEST_TIMEOUT_MS, WpClient},
    session::{Session, SessionStore},
};

const DEFAULT_THREAD_PAGE_SIZE: u16 = 20;
const SERVER_PAGE_SIZE_CAP: u16 = 100;
const DEFAULT_TIMELINE_MAX_ITEMS: usize = 500;

/// Builds the REST client once `Init` names the base URL.
pub type ApiFactory =
    Arc<dyn Fn(&str, Duration) -> Result<Arc<dyn ChatApi>, BackendError> + Send + Sync>;

/// Factory producing [`WpClient`]s.
pub fn wp_api_factory() -> ApiFactory {
    Arc::new(|base_url, request_timeout| {
        let client = WpClient::new(base_url, request_timeout)?;
        Ok(Arc::new(client) as Arc<dyn ChatApi>)
    })
}

/// Effective tuning after applying `BackendInitConfig` overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub poll_interval: Duration,
    pub pending_ttl_ms: u64,
    pub thread_page_size: u16,
    pub request_timeout: Duration,
    pub timeline_max_items: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_init(None)
    }
}

impl RuntimeSettings {
    pub fn from_init(config: Option<&BackendInitConfig>) -> Self {
        let config = config.cloned().unwrap_or_default();
        Self {
            poll_interval: Duration::from_millis(
                config
                    .poll_interval_ms
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                    .max(1),
            ),
            pending_ttl_ms: config.pending_ttl_ms.unwrap_or(DEFAULT_PENDING_TTL_MS),
            thread_page_size: bounded_page_size(
                config.thread_page_size.unwrap_or(DEFAULT_THREAD_PAGE_SIZE),
                SERVER_PAGE_SIZE_CAP,
            ),
            request_timeout: Duration::from_millis(
                config
                    .request_timeout_ms
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS)
                    .max(1),
            ),
            timeline_max_items: config
                .timeline_max_items
                .unwrap_or(DEFAULT_TIMELINE_MAX_ITEMS)
                .max(1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WpRuntimeHandle {
    channels: BackendChannels,
}

impl WpRuntimeHandle {
    pub async fn send(&self, command: BackendCommand) -> Result<(), BackendChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }
}

/// Spawn a runtime talking to a real WordPress site.
pub fn spawn_runtime(secrets: Arc<dyn SecretStore>) -> WpRuntimeHandle {
    spawn_runtime_with(wp_api_factory(), secrets)
}

pub fn spawn_runtime_with(
    api_factory: ApiFactory,
    secrets: Arc<dyn SecretStore>,
) -> WpRuntimeHandle {
    let (channels, command_rx) = BackendChannels::with_default_capacity();
    let runtime = WpRuntime::new(channels.clone(), command_rx, api_factory, secrets);
    tokio::spawn(async move {
        runtime.run().await;
    });

    WpRuntimeHandle { channels }
}

/// Poll source for one thread: the thread endpoint on behalf of a session.
struct ThreadFeed {
    api: Arc<dyn ChatApi>,
    session: Session,
}

#[async_trait]
impl MessageSource for ThreadFeed {
    async fn fetch_recent_messages(
        &self,
        thread_id: ThreadId,
    ) -> Result<Vec<Message>, BackendError> {
        self.api
            .get_thread(&self.session, thread_id)
            .await
            .map(|page| page.messages)
    }
}

struct OpenThread {
    timeline: SharedTimeline<ContentMatcher>,
    poller: PollHandle,
}

struct WpRuntime {
    channels: BackendChannels,
    command_rx: mpsc::Receiver<BackendCommand>,
    events_rx: EventStream,
    state_machine: BackendStateMachine,
    api_factory: ApiFactory,
    api: Option<Arc<dyn ChatApi>>,
    base_url: Option<String>,
    settings: RuntimeSettings,
    sessions: SessionStore,
    session: Option<Session>,
    identity: IdentityResolution,
    threads: Vec<ThreadSummary>,
    open_threads: HashMap<ThreadId, OpenThread>,
    tracker: SendTracker,
}

impl WpRuntime {
    fn new(
        channels: BackendChannels,
        command_rx: mpsc::Receiver<BackendCommand>,
        api_factory: ApiFactory,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        let events_rx = channels.subscribe();
        Self {
            channels,
            command_rx,
            events_rx,
            state_machine: BackendStateMachine::default(),
            api_factory,
            api: None,
            base_url: None,
            settings: RuntimeSettings::default(),
            sessions: SessionStore::new(secrets),
            session: None,
            identity: IdentityResolution::Unresolved,
            threads: Vec::new(),
            open_threads: HashMap::new(),
            tracker: SendTracker::default(),
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else { break };
                    let kind = command.kind();
                    debug!(command = kind, "handling command");
                    if let Err(err) = self.handle_command(command).await {
                        self.report_error(kind, err);
                    }
                }
                event = self.events_rx.recv() => match event {
                    Ok(BackendEvent::SessionExpired) => self.expire_session().await,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }

        self.stop_all_pollers().await;
    }

    async fn handle_command(&mut self, command: BackendCommand) -> Result<(), BackendError> {
        match command {
            BackendCommand::Init { base_url, config } => self.handle_init(base_url, config),
            BackendCommand::LoginPassword { username, password } => {
                self.handle_login_password(username, password).await;
                Ok(())
            }
            BackendCommand::RestoreSession => {
                self.handle_restore_session().await;
                Ok(())
            }
            BackendCommand::ListThreads => self.handle_list_threads().await,
            BackendCommand::OpenThread { thread_id } => self.handle_open_thread(thread_id).await,
            BackendCommand::RefreshThread { thread_id } => self.handle_refresh_thread(thread_id),
            BackendCommand::CloseThread { thread_id } => self.handle_close_thread(thread_id).await,
            BackendCommand::SendMessage { thread_id, body } => {
                self.handle_send_message(thread_id, body).await;
                Ok(())
            }
            BackendCommand::StartConversation {
                recipient_id,
                subject,
                body,
            } => {
                self.handle_start_conversation(recipient_id, subject, body)
                    .await
            }
            BackendCommand::ListMembers {
                page,
                per_page,
                search,
            } => self.handle_list_members(page, per_page, search).await,
            BackendCommand::GetMember { user_id } => self.handle_get_member(user_id).await,
            BackendCommand::ListMatches => self.handle_list_matches().await,
            BackendCommand::ListActivity { page, per_page } => {
                self.handle_list_activity(page, per_page).await
            }
            BackendCommand::GetProfile { user } => self.handle_get_profile(user).await,
            BackendCommand::Logout => self.handle_logout().await,
        }
    }

    fn handle_init(
        &mut self,
        base_url: String,
        config: Option<BackendInitConfig>,
    ) -> Result<(), BackendError> {
        let (candidate, transition_events) = self.validate_transition(BackendCommand::Init {
            base_url: String::new(),
            config: None,
        })?;

        let settings = RuntimeSettings::from_init(config.as_ref());
        let base_url = base_url.trim().trim_end_matches('/').to_owned();
        let api = (self.api_factory)(&base_url, settings.request_timeout)?;

        info!(
            %base_url,
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            pending_ttl_ms = settings.pending_ttl_ms,
            "backend initialized"
        );
        self.api = Some(api);
        self.base_url = Some(base_url);
        self.settings = settings;
        self.tracker = SendTracker::new(settings.pending_ttl_ms);

        self.commit_transition(candidate, transition_events);
        Ok(())
    }

    async fn handle_login_password(&mut self, username: String, password: String) {
        let transition = self.validate_transition(BackendCommand::LoginPassword {
            username: String::new(),
            password: String::new(),
        });
        let (candidate, transition_events) = match transition {
            Ok(transition) => transition,
            Err(err) => {
                self.emit_auth_failure(err);
                return;
            }
        };
        self.commit_transition(candidate, transition_events);

        let api = match self.require_api() {
            Ok(api) => api,
            Err(err) => {
                self.finish_auth(Err(err));
                return;
            }
        };

        let result = match api.login(&username, &password).await {
            Ok(session) => self.persist_session(&session).map(|()| session),
            Err(err) => Err(err),
        };
        self.finish_auth(result);
    }

    async fn handle_restore_session(&mut self) {
        let transition = self.validate_transition(BackendCommand::RestoreSession);
        let (candidate, transition_events) = match transition {
            Ok(transition) => transition,
            Err(err) => {
                self.emit_auth_failure(err);
                return;
            }
        };
        self.commit_transition(candidate, transition_events);

        let (api, base_url) = match self.require_api().and_then(|api| {
            self.require_base_url()
                .map(|base_url| (api, base_url.to_owned()))
        }) {
            Ok(pair) => pair,
            Err(err) => {
                self.finish_auth(Err(err));
                return;
            }
        };

        let session = match self.sessions.load(&base_url) {
            Ok(session) => session,
            Err(err) => {
                self.finish_auth(Err(err));
                return;
            }
        };

        match api.validate_token(&session).await {
            Ok(()) => self.finish_auth(Ok(session)),
            Err(err) => {
                if err.category == BackendErrorCategory::Auth
                    && let Err(clear_err) = self.sessions.clear(&base_url)
                {
                    warn!(code = %clear_err.code, "failed to clear rejected session");
                }
                self.finish_auth(Err(err));
            }
        }
    }

    async fn handle_list_threads(&mut self) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::ListThreads)?;
        let (api, session) = self.require_session()?;

        let page = api
            .list_threads(&session, 1, self.settings.thread_page_size)
            .await?;
        self.absorb_roster(&session, &page.roster).await;

        let mut threads = page.threads;
        retitle_threads(&mut threads, &page.roster, self.identity.user_id());
        self.threads = threads.clone();
        self.channels.emit(BackendEvent::ThreadListUpdated { threads });
        Ok(())
    }

    async fn handle_open_thread(&mut self, thread_id: ThreadId) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::OpenThread { thread_id })?;

        if let Some(open) = self.open_threads.get(&thread_id) {
            open.poller.refresh();
            let snapshot = open.timeline.lock().await.snapshot();
            self.channels.emit(BackendEvent::ThreadSnapshot(snapshot));
            return Ok(());
        }

        let (api, session) = self.require_session()?;
        if self.identity == IdentityResolution::Unresolved {
            // Roster only arrives with the thread listing.
            match api
                .list_threads(&session, 1, self.settings.thread_page_size)
                .await
            {
                Ok(page) => self.absorb_roster(&session, &page.roster).await,
                Err(err) if err.category == BackendErrorCategory::Auth => return Err(err),
                Err(err) => warn!(thread_id, code = %err.code, "roster fetch failed"),
            }
        }

        let mut timeline = ThreadTimeline::new(thread_id, self.settings.timeline_max_items);
        timeline.set_title(
            self.threads
                .iter()
                .find(|thread| thread.thread_id == thread_id)
                .map(|thread| thread.title.clone()),
        );
        timeline.set_current_user(self.identity.user_id());
        let timeline = Arc::new(Mutex::new(timeline));

        let poller = spawn_poller(
            Arc::new(ThreadFeed { api, session }),
            timeline.clone(),
            thread_id,
            self.channels.events(),
            PollerConfig {
                interval: self.settings.poll_interval,
                retry: RetryPolicy::for_poll_interval(self.settings.poll_interval),
                seeded: false,
            },
        );
        debug!(thread_id, "thread opened");
        self.open_threads
            .insert(thread_id, OpenThread { timeline, poller });
        Ok(())
    }

    fn handle_refresh_thread(&mut self, thread_id: ThreadId) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::RefreshThread { thread_id })?;
        self.require_open(thread_id)?.poller.refresh();
        Ok(())
    }

    async fn handle_close_thread(&mut self, thread_id: ThreadId) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::CloseThread { thread_id })?;
        self.require_open(thread_id)?;

        if let Some(open) = self.open_threads.remove(&thread_id) {
            open.poller.stop().await;
        }
        self.tracker.forget_thread(thread_id);
        self.channels.emit(BackendEvent::ThreadClosed { thread_id });
        Ok(())
    }

    async fn handle_send_message(&mut self, thread_id: ThreadId, body: String) {
        if let Err(err) = self.validate_transition(BackendCommand::SendMessage {
            thread_id,
            body: String::new(),
        }) {
            self.emit_send_failure(thread_id, "", err, Some(body));
            return;
        }

        let text = body.trim().to_owned();
        if text.is_empty() {
            let err = BackendError::new(
                BackendErrorCategory::Config,
                "empty_message",
                "message body is empty",
            );
            self.emit_send_failure(thread_id, "", err, Some(body));
            return;
        }

        let (api, session) = match self.require_session() {
            Ok(pair) => pair,
            Err(err) => {
                self.emit_send_failure(thread_id, "", err, Some(body));
                return;
            }
        };
        let timeline = match self.require_open(thread_id) {
            Ok(open) => open.timeline.clone(),
            Err(err) => {
                self.emit_send_failure(thread_id, "", err, Some(body));
                return;
            }
        };

        let local_key = {
            let mut guard = timeline.lock().await;
            self.tracker.retain_unresolved(thread_id, guard.messages());
            let provisional = self.tracker.create_provisional(
                thread_id,
                self.identity.user_id(),
                text.clone(),
                unix_now_ms(),
            );
            let local_key = provisional.local_key.clone();
            if let Err(err) = guard.insert_provisional(provisional) {
                drop(guard);
                self.tracker.on_send_failed(&local_key);
                let err = BackendError::new(
                    BackendErrorCategory::Internal,
                    "timeline_insert_failed",
                    err.to_string(),
                );
                self.emit_send_failure(thread_id, &local_key, err, Some(body));
                return;
            }
            self.channels.emit(BackendEvent::ThreadSnapshot(guard.snapshot()));
            local_key
        };

        match api
            .send_message(&session, thread_id, &text, &local_key)
            .await
        {
            Ok(()) => {
                debug!(thread_id, %local_key, "send accepted");
                self.channels.emit(normalize_send_outcome(
                    thread_id,
                    local_key,
                    SendOutcome::Accepted,
                ));
                if let Some(open) = self.open_threads.get(&thread_id) {
                    open.poller.refresh();
                }
            }
            Err(err) => {
                warn!(thread_id, %local_key, code = %err.code, "send failed");
                let restore_body = self.tracker.on_send_failed(&local_key).unwrap_or(text);
                let stored = {
                    let mut guard = timeline.lock().await;
                    match guard.remove_pending(&local_key) {
                        Ok(_) => {
                            self.channels.emit(BackendEvent::ThreadSnapshot(guard.snapshot()));
                            false
                        }
                        Err(TimelineMergeError::AlreadyConfirmed(_)) => true,
                        Err(remove_err) => {
                            debug!(
                                %local_key,
                                error = %remove_err,
                                "failed send already left the timeline"
                            );
                            false
                        }
                    }
                };
                let expired = err.category == BackendErrorCategory::Auth;
                if stored {
                    // A poll already saw the message on the server.
                    info!(thread_id, %local_key, "send errored after the server stored it");
                    self.channels.emit(normalize_send_outcome(
                        thread_id,
                        local_key,
                        SendOutcome::Accepted,
                    ));
                } else {
                    self.emit_send_failure(thread_id, &local_key, err, Some(restore_body));
                }
                if expired {
                    self.channels.emit(BackendEvent::SessionExpired);
                }
            }
        }
    }

    async fn handle_start_conversation(
        &mut self,
        recipient_id: UserId,
        subject: Option<String>,
        body: String,
    ) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::StartConversation {
            recipient_id,
            subject: None,
            body: String::new(),
        })?;
        let text = body.trim();
        if text.is_empty() {
            return Err(BackendError::new(
                BackendErrorCategory::Config,
                "empty_message",
                "message body is empty",
            ));
        }
        let (api, session) = self.require_session()?;

        match api
            .start_conversation(&session, recipient_id, subject.as_deref(), text)
            .await
        {
            Ok(thread_id) => {
                info!(recipient_id, ?thread_id, "conversation started");
                if let Some(open) = thread_id.and_then(|id| self.open_threads.get(&id)) {
                    open.poller.refresh();
                }
                self.channels.emit(BackendEvent::ConversationStarted {
                    recipient_id,
                    thread_id,
                    error_code: None,
                });
            }
            Err(err) => {
                warn!(recipient_id, code = %err.code, "start conversation failed");
                let expired = err.category == BackendErrorCategory::Auth;
                self.channels.emit(BackendEvent::ConversationStarted {
                    recipient_id,
                    thread_id: None,
                    error_code: Some(err.code),
                });
                if expired {
                    self.channels.emit(BackendEvent::SessionExpired);
                }
            }
        }
        Ok(())
    }

    async fn handle_list_members(
        &mut self,
        page: u32,
        per_page: u16,
        search: Option<String>,
    ) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::ListMembers {
            page,
            per_page,
            search: None,
        })?;
        let (api, session) = self.require_session()?;

        let page = page.max(1);
        let members = api
            .list_members(
                &session,
                page,
                bounded_page_size(per_page, SERVER_PAGE_SIZE_CAP),
                search.as_deref(),
            )
            .await?;
        self.channels.emit(BackendEvent::MembersLoaded { page, members });
        Ok(())
    }

    async fn handle_get_member(&mut self, user_id: UserId) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::GetMember { user_id })?;
        let (api, session) = self.require_session()?;

        let member = api.get_member(&session, user_id).await?;
        self.channels.emit(BackendEvent::MemberLoaded { member });
        Ok(())
    }

    async fn handle_list_matches(&mut self) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::ListMatches)?;
        let (api, session) = self.require_session()?;

        let matches = api.list_matches(&session).await?;
        self.channels.emit(BackendEvent::MatchesLoaded { matches });
        Ok(())
    }

    async fn handle_list_activity(&mut self, page: u32, per_page: u16) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::ListActivity { page, per_page })?;
        let (api, session) = self.require_session()?;

        let page = page.max(1);
        let items = api
            .list_activity(&session, page, bounded_page_size(per_page, SERVER_PAGE_SIZE_CAP))
            .await?;
        debug!(page, count = items.len(), "activity loaded");
        self.channels.emit(BackendEvent::ActivityLoaded { page, items });
        Ok(())
    }

    async fn handle_get_profile(&mut self, user: ProfileTarget) -> Result<(), BackendError> {
        self.validate_transition(BackendCommand::GetProfile { user })?;
        let (api, session) = self.require_session()?;

        let profile = api.get_profile(&session, user).await?;
        if user == ProfileTarget::Me && self.identity == IdentityResolution::Unresolved {
            // The server named the token's account; keep it for ownership.
            info!(user_id = profile.member.user_id, "identity resolved from own profile");
            self.identity = IdentityResolution::Account(profile.member.user_id);
        }
        self.channels.emit(BackendEvent::ProfileLoaded { user, profile });
        Ok(())
    }

    async fn handle_logout(&mut self) -> Result<(), BackendError> {
        let (candidate, transition_events) = self.validate_transition(BackendCommand::Logout)?;

        if let Some(base_url) = self.base_url.as_deref() {
            self.sessions.clear(base_url)?;
        }
        self.stop_all_pollers().await;
        self.drop_session_state();

        self.commit_transition(candidate, transition_events);
        info!("logged out");
        Ok(())
    }

    /// Tear down after the server rejected the token. Safe to call repeatedly.
    async fn expire_session(&mut self) {
        if let Some(state_event) = self.state_machine.on_session_expired() {
            self.channels.emit(state_event);
        }
        if self.session.is_none() && self.open_threads.is_empty() {
            return;
        }

        warn!("session expired; closing threads");
        self.stop_all_pollers().await;
        self.drop_session_state();
        if let Some(base_url) = self.base_url.as_deref()
            && let Err(err) = self.sessions.clear(base_url)
        {
            warn!(code = %err.code, "failed to clear expired session");
        }
    }

    async fn stop_all_pollers(&mut self) {
        for (thread_id, open) in self.open_threads.drain() {
            open.poller.stop().await;
            self.tracker.forget_thread(thread_id);
            self.channels.emit(BackendEvent::ThreadClosed { thread_id });
        }
    }

    fn drop_session_state(&mut self) {
        self.session = None;
        self.identity = IdentityResolution::Unresolved;
        self.threads.clear();
    }

    /// Resolve identity from a roster unless the token endpoint named the
    /// account explicitly, and push a changed id into open timelines.
    async fn absorb_roster(&mut self, session: &Session, roster: &[RosterEntry]) {
        if matches!(self.identity, IdentityResolution::Account(_)) || roster.is_empty() {
            return;
        }

        let resolved = resolve_current_user(&session.profile, roster);
        if resolved.user_id() == self.identity.user_id() {
            self.identity = resolved;
            return;
        }

        self.identity = resolved;
        for open in self.open_threads.values() {
            open.timeline
                .lock()
                .await
                .set_current_user(resolved.user_id());
        }
    }

    fn report_error(&mut self, command: &str, err: BackendError) {
        warn!(command, code = %err.code, error = %err.message, "command failed");
        let expired = err.category == BackendErrorCategory::Auth && self.session.is_some();
        self.channels.emit(BackendEvent::FatalError {
            recoverable: err.is_transient(),
            code: err.code,
            message: err.message,
        });
        if expired {
            self.channels.emit(BackendEvent::SessionExpired);
        }
    }

    fn validate_transition(
        &self,
        command: BackendCommand,
    ) -> Result<(BackendStateMachine, Vec<BackendEvent>), BackendError> {
        let mut candidate = self.state_machine.clone();
        let events = candidate.apply(&command)?;
        Ok((candidate, events))
    }

    fn commit_transition(&mut self, candidate: BackendStateMachine, events: Vec<BackendEvent>) {
        self.state_machine = candidate;
        for event in events {
            self.channels.emit(event);
        }
    }

    fn require_api(&self) -> Result<Arc<dyn ChatApi>, BackendError> {
        self.api.clone().ok_or_else(|| {
            BackendError::new(
                BackendErrorCategory::Config,
                "backend_not_initialized",
                "backend is not initialized; send Init first",
            )
        })
    }

    fn require_base_url(&self) -> Result<&str, BackendError> {
        self.base_url.as_deref().ok_or_else(|| {
            BackendError::new(
                BackendErrorCategory::Config,
                "backend_not_initialized",
                "runtime base url is not available; send Init first",
            )
        })
    }

    fn require_session(&self) -> Result<(Arc<dyn ChatApi>, Session), BackendError> {
        let api = self.require_api()?;
        let session = self.session.clone().ok_or_else(|| {
            BackendError::new(
                BackendErrorCategory::Auth,
                "not_logged_in",
                "no active session",
            )
        })?;
        Ok((api, session))
    }

    fn require_open(&self, thread_id: ThreadId) -> Result<&OpenThread, BackendError> {
        self.open_threads.get(&thread_id).ok_or_else(|| {
            BackendError::new(
                BackendErrorCategory::Config,
                "thread_not_open",
                format!("thread {thread_id} is not open"),
            )
        })
    }

    fn persist_session(&self, session: &Session) -> Result<(), BackendError> {
        let base_url = self.require_base_url()?;
        self.sessions.save(base_url, session)
    }

    fn finish_auth(&mut self, result: Result<Session, BackendError>) {
        if let Ok(state_event) = self.state_machine.on_auth_result(result.is_ok()) {
            self.channels.emit(state_event);
        }

        match result {
            Ok(session) => {
                info!(account = session.profile.label(), "authenticated");
                self.identity = session
                    .profile
                    .user_id
                    .map_or(IdentityResolution::Unresolved, IdentityResolution::Account);
                let profile = session.profile.clone();
                self.session = Some(session);
                self.channels.emit(BackendEvent::AuthResult {
                    success: true,
                    error_code: None,
                    profile: Some(profile),
                });
            }
            Err(err) => {
                warn!(code = %err.code, "authentication failed");
                self.channels.emit(BackendEvent::AuthResult {
                    success: false,
                    error_code: Some(err.code),
                    profile: None,
                });
            }
        }
    }

    fn emit_auth_failure(&self, error: BackendError) {
        self.channels.emit(BackendEvent::AuthResult {
            success: false,
            error_code: Some(error.code),
            profile: None,
        });
    }

    fn emit_send_failure(
        &self,
        thread_id: ThreadId,
        local_key: &str,
        error: BackendError,
        restore_body: Option<String>,
    ) {
        self.channels.emit(normalize_send_outcome(
            thread_id,
            local_key,
            SendOutcome::Failed {
                error,
                restore_body,
            },
        ));
    }
}
