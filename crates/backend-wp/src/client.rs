//! `reqwest` implementation of [`ChatApi`] against a WordPress REST root.
//!
//! Reads fall back from Better Messages to BuddyPress on any failure except a
//! rejected token. Writes fall back only when the Better Messages route itself
//! refused the request with a 4xx. A transport failure might have delivered the
//! message, and posting it again through the other API would duplicate it.
//! Any 2xx answer to a write counts as delivered whatever its body looks like,
//! since plugins often print PHP notices ahead of the JSON.

use std::time::Duration;

use async_trait::async_trait;
use backend_core::{
    ActivityItem, BackendError, BackendErrorCategory, MemberProfile, MemberSummary, ProfileTarget,
    ThreadId, ThreadPage, ThreadSummary, UserId,
    normalization::{
        account_profile_from_token_response, normalize_activity, normalize_buddypress_thread,
        normalize_member, normalize_profile_groups, normalize_thread_listing, strip_html,
    },
    unix_now_ms,
    wire::{
        BuddyPressActivity, BuddyPressMember, BuddyPressThread, MatchesPayload, OneOrMany,
        ThreadListing, XProfileGroup, thread_id_from_response,
    },
};
use reqwest::{RequestBuilder, header::RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::{api::ChatApi, session::Session};

pub const DEFAULT_BASE_URL: &str = "https://example.org/wp-json";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const USER_AGENT: &str = concat!("swoon/", env!("CARGO_PKG_VERSION"));
const DEFAULT_CONVERSATION_SUBJECT: &str = "Nowa wiadomość";

#[derive(Debug, Clone)]
pub struct WpClient {
    http: reqwest::Client,
    base: Url,
}

impl WpClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        let base = parse_base_url(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| {
                BackendError::new(
                    BackendErrorCategory::Config,
                    "client_build_error",
                    err.to_string(),
                )
            })?;

        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base.join(path.trim_start_matches('/')).map_err(|err| {
            BackendError::new(
                BackendErrorCategory::Config,
                "invalid_endpoint",
                format!("cannot build endpoint '{path}': {err}"),
            )
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        session: Option<&Session>,
        path: &str,
    ) -> Result<RequestBuilder, BackendError> {
        let url = self.endpoint(path)?;
        debug!(%method, %url, "wp request");
        let builder = self.http.request(method, url);
        Ok(match session {
            Some(session) => builder.bearer_auth(&session.token),
            None => builder,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BackendError> {
        let request = self
            .request(reqwest::Method::GET, Some(session), path)?
            .query(query);
        execute(request).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        session: Option<&Session>,
        path: &str,
        body: &Value,
    ) -> Result<T, BackendError> {
        let request = self
            .request(reqwest::Method::POST, session, path)?
            .json(body);
        execute(request).await
    }

    /// POST a write. Any 2xx is success; the body is decoded only if it can be.
    async fn post_accepted(
        &self,
        session: &Session,
        path: &str,
        body: &Value,
    ) -> Result<Option<Value>, BackendError> {
        let request = self
            .request(reqwest::Method::POST, Some(session), path)?
            .json(body);
        let raw = fetch(request).await?;
        Ok(lenient_json(&raw))
    }

    async fn send_better_messages(
        &self,
        session: &Session,
        thread_id: ThreadId,
        body: &str,
        client_token: &str,
    ) -> Result<(), BackendError> {
        let mut payload = json!({ "message": body });
        if !client_token.is_empty() {
            payload["tempId"] = Value::String(client_token.to_owned());
        }
        self.post_accepted(
            session,
            &format!("better-messages/v1/thread/{thread_id}/send"),
            &payload,
        )
        .await
        .map(|_| ())
    }

    /// Look up the existing one-to-one thread with `recipient_id`. Nothing is
    /// written, so any failure other than a rejected token can fall through to
    /// creating a new thread.
    async fn private_thread(
        &self,
        session: &Session,
        recipient_id: UserId,
    ) -> Result<Option<ThreadId>, BackendError> {
        match self
            .post_json::<Value>(
                Some(session),
                "better-messages/v1/getPrivateThread",
                &json!({ "user_id": recipient_id }),
            )
            .await
        {
            Ok(response) => Ok(thread_id_from_response(&response)),
            Err(err) if err.category == BackendErrorCategory::Auth => Err(err),
            Err(err) => {
                warn!(recipient_id, code = %err.code, "private thread lookup failed");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ChatApi for WpClient {
    async fn login(&self, username: &str, password: &str) -> Result<Session, BackendError> {
        let response: Value = self
            .post_json(
                None,
                "jwt-auth/v1/token",
                &json!({ "username": username, "password": password }),
            )
            .await
            .map_err(|err| match err.category {
                BackendErrorCategory::Auth | BackendErrorCategory::Config => BackendError::new(
                    BackendErrorCategory::Auth,
                    "invalid_credentials",
                    err.message,
                ),
                _ => err,
            })?;

        let token = response
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                BackendError::new(
                    BackendErrorCategory::Serialization,
                    "token_missing",
                    "token endpoint answered without a token",
                )
            })?;

        Ok(Session::new(
            token,
            account_profile_from_token_response(username, &response),
        ))
    }

    async fn validate_token(&self, session: &Session) -> Result<(), BackendError> {
        self.post_json::<Value>(Some(session), "jwt-auth/v1/token/validate", &json!({}))
            .await
            .map(|_| ())
    }

    async fn list_threads(
        &self,
        session: &Session,
        page: u32,
        per_page: u16,
    ) -> Result<ThreadPage, BackendError> {
        let listing: ThreadListing = self
            .get_json(
                session,
                "better-messages/v1/threads",
                &[
                    ("page", page.max(1).to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;
        Ok(normalize_thread_listing(
            &listing,
            session.profile.user_id,
            unix_now_ms(),
        ))
    }

    async fn get_thread(
        &self,
        session: &Session,
        thread_id: ThreadId,
    ) -> Result<ThreadPage, BackendError> {
        let path = format!("better-messages/v1/thread/{thread_id}");
        let primary = self.get_json::<ThreadListing>(session, &path, &[]).await;

        let err = match primary {
            Ok(listing) => {
                let mut page =
                    normalize_thread_listing(&listing, session.profile.user_id, unix_now_ms());
                for message in page.messages.iter_mut().filter(|m| m.thread_id == 0) {
                    message.thread_id = thread_id;
                }
                return Ok(page);
            }
            Err(err) if err.category == BackendErrorCategory::Auth => return Err(err),
            Err(err) => err,
        };

        warn!(
            thread_id,
            code = %err.code,
            "better messages thread fetch failed; trying buddypress"
        );
        match self
            .get_json::<OneOrMany<BuddyPressThread>>(
                session,
                &format!("buddypress/v1/messages/{thread_id}"),
                &[],
            )
            .await
        {
            Ok(payload) => Ok(buddypress_page(thread_id, payload.into_vec(), unix_now_ms())),
            Err(fallback) if fallback.category == BackendErrorCategory::Auth => Err(fallback),
            Err(fallback) => {
                debug!(thread_id, code = %fallback.code, "buddypress fallback failed too");
                Err(err)
            }
        }
    }

    async fn send_message(
        &self,
        session: &Session,
        thread_id: ThreadId,
        body: &str,
        client_token: &str,
    ) -> Result<(), BackendError> {
        let err = match self
            .send_better_messages(session, thread_id, body, client_token)
            .await
        {
            Ok(()) => return Ok(()),
            Err(err) if !rejected_by_route(&err) => return Err(err),
            Err(err) => err,
        };

        warn!(
            thread_id,
            code = %err.code,
            "better messages send rejected; replying via buddypress"
        );
        self.post_accepted(
            session,
            "buddypress/v1/messages",
            &json!({ "thread_id": thread_id, "message": body }),
        )
        .await
        .map(|_| ())
    }

    async fn start_conversation(
        &self,
        session: &Session,
        recipient_id: UserId,
        subject: Option<&str>,
        body: &str,
    ) -> Result<Option<ThreadId>, BackendError> {
        if let Some(thread_id) = self.private_thread(session, recipient_id).await? {
            match self.send_better_messages(session, thread_id, body, "").await {
                Ok(()) => return Ok(Some(thread_id)),
                Err(err) if !rejected_by_route(&err) => return Err(err),
                Err(err) => {
                    warn!(recipient_id, code = %err.code, "private thread send rejected");
                }
            }
        }

        debug!(recipient_id, "creating new thread");
        let subject = subject
            .map(str::trim)
            .filter(|subject| !subject.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_SUBJECT);
        let response = self
            .post_accepted(
                session,
                "better-messages/v1/thread/new",
                &json!({ "recipients": [recipient_id], "message": body, "subject": subject }),
            )
            .await?;
        Ok(response.as_ref().and_then(thread_id_from_response))
    }

    async fn list_members(
        &self,
        session: &Session,
        page: u32,
        per_page: u16,
        search: Option<&str>,
    ) -> Result<Vec<MemberSummary>, BackendError> {
        let mut query = vec![
            ("page", page.max(1).to_string()),
            ("per_page", per_page.to_string()),
            ("populate_extras", "true".to_owned()),
        ];
        if let Some(search) = search.map(str::trim).filter(|search| !search.is_empty()) {
            query.push(("search", search.to_owned()));
        }

        let members: Vec<BuddyPressMember> = self
            .get_json(session, "buddypress/v1/members", &query)
            .await?;
        Ok(members.iter().map(normalize_member).collect())
    }

    async fn get_member(
        &self,
        session: &Session,
        user_id: UserId,
    ) -> Result<MemberSummary, BackendError> {
        let member: BuddyPressMember = self
            .get_json(
                session,
                &format!("buddypress/v1/members/{user_id}"),
                &[("populate_extras", "true".to_owned())],
            )
            .await?;
        Ok(normalize_member(&member))
    }

    async fn list_matches(&self, session: &Session) -> Result<Vec<MemberSummary>, BackendError> {
        let payload: MatchesPayload = self.get_json(session, "sk/v1/matches", &[]).await?;
        Ok(payload.into_members().iter().map(normalize_member).collect())
    }

    async fn list_activity(
        &self,
        session: &Session,
        page: u32,
        per_page: u16,
    ) -> Result<Vec<ActivityItem>, BackendError> {
        let items: Vec<BuddyPressActivity> = self
            .get_json(
                session,
                "buddypress/v1/activity",
                &[
                    ("page", page.max(1).to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;
        Ok(items.iter().map(normalize_activity).collect())
    }

    async fn get_profile(
        &self,
        session: &Session,
        target: ProfileTarget,
    ) -> Result<MemberProfile, BackendError> {
        let member: BuddyPressMember = self
            .get_json(
                session,
                &format!("buddypress/v1/members/{target}"),
                &[("populate_extras", "true".to_owned())],
            )
            .await?;

        // Without user_id the server describes the token's own account.
        let mut query = vec![
            ("fetch_fields", "true".to_owned()),
            ("fetch_field_data", "true".to_owned()),
        ];
        if let ProfileTarget::User(user_id) = target {
            query.push(("user_id", user_id.to_string()));
        }
        let groups = match self
            .get_json::<Vec<XProfileGroup>>(session, "buddypress/v1/xprofile/groups", &query)
            .await
        {
            Ok(groups) => normalize_profile_groups(&groups),
            Err(err) if err.category == BackendErrorCategory::Auth => return Err(err),
            Err(err) => {
                warn!(%target, code = %err.code, "extended profile unavailable");
                Vec::new()
            }
        };

        Ok(MemberProfile {
            member: normalize_member(&member),
            groups,
        })
    }
}

/// Parse a REST root, forcing a trailing slash so endpoint joins append.
pub fn parse_base_url(base_url: &str) -> Result<Url, BackendError> {
    let mut url = Url::parse(base_url.trim()).map_err(|err| {
        BackendError::new(
            BackendErrorCategory::Config,
            "invalid_base_url",
            format!("invalid base url '{base_url}': {err}"),
        )
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(BackendError::new(
            BackendErrorCategory::Config,
            "invalid_base_url",
            format!("base url must be an http(s) REST root, got '{base_url}'"),
        ));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, BackendError> {
    let body = fetch(request).await?;
    serde_json::from_slice(&body).map_err(|err| {
        BackendError::new(
            BackendErrorCategory::Serialization,
            "response_decode_error",
            err.to_string(),
        )
    })
}

/// Send `request` and return the raw body of a 2xx answer.
async fn fetch(request: RequestBuilder) -> Result<Vec<u8>, BackendError> {
    let response = request.send().await.map_err(map_reqwest_error)?;
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.bytes().await.map_err(map_reqwest_error)?;

    if !status.is_success() {
        return Err(map_http_failure(status.as_u16(), &body, retry_after));
    }
    Ok(body.to_vec())
}

/// Decode a write answer, skipping any text a plugin printed before the JSON.
fn lenient_json(body: &[u8]) -> Option<Value> {
    if let Ok(value) = serde_json::from_slice(body) {
        return Some(value);
    }
    let found = body
        .iter()
        .enumerate()
        .filter(|(_, byte)| matches!(byte, b'{' | b'['))
        .find_map(|(start, _)| {
            serde_json::Deserializer::from_slice(&body[start..])
                .into_iter::<Value>()
                .next()?
                .ok()
        });
    if found.is_none() {
        debug!(len = body.len(), "write answer is not json");
    }
    found
}

/// Map a non-success response, keeping the host's retry hint.
fn map_http_failure(status: u16, body: &[u8], retry_after: Option<Duration>) -> BackendError {
    let mapped = BackendError::from_wp_response(status, body);
    match retry_after {
        Some(delay) => mapped.with_retry_after(delay),
        None => mapped,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> BackendError {
    let (category, code) = if err.is_timeout() {
        (BackendErrorCategory::Network, "request_timeout")
    } else if err.is_connect() {
        (BackendErrorCategory::Network, "connection_failed")
    } else if err.is_decode() {
        (BackendErrorCategory::Serialization, "response_decode_error")
    } else if err.is_builder() {
        (BackendErrorCategory::Config, "request_build_error")
    } else {
        (BackendErrorCategory::Network, "http_error")
    };
    BackendError::new(category, code, err.to_string())
}

/// The route answered with a refusal, so the write did not happen.
fn rejected_by_route(err: &BackendError) -> bool {
    err.category == BackendErrorCategory::Config
}

fn buddypress_page(thread_id: ThreadId, threads: Vec<BuddyPressThread>, now_ms: u64) -> ThreadPage {
    let Some(thread) = threads
        .iter()
        .find(|thread| thread.id == thread_id)
        .or_else(|| threads.first())
    else {
        return ThreadPage::default();
    };

    let title = thread
        .subject
        .as_ref()
        .and_then(|subject| subject.best())
        .map(|subject| strip_html(subject).trim().to_owned())
        .filter(|subject| !subject.is_empty());
    let messages = normalize_buddypress_thread(thread, now_ms);
    let newest = messages.iter().max_by_key(|message| message.timestamp_ms);

    let summary = ThreadSummary {
        thread_id,
        title: title.unwrap_or_else(|| "Conversation".to_owned()),
        participants: Vec::new(),
        last_message: newest.map(|message| message.body.clone()),
        last_activity_ms: newest.map(|message| message.timestamp_ms),
        unread_count: 0,
    };

    ThreadPage {
        threads: vec![summary],
        messages,
        roster: Vec::new(),
    }
}
