//! Conversion of raw backend records into canonical types.
//!
//! Timestamp precedence for message records:
//! 1. numeric epoch field (`created_at`), unit detected by magnitude
//! 2. ISO-8601 sent date (`date_sent_gmt` before `date_sent` for BuddyPress)
//! 3. the normalization time, with a warning
//!
//! Bodies have markup removed by [`strip_html`]. Entities are left as-is.

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
};

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use tracing::{trace, warn};

use crate::{
    error::{BackendError, BackendErrorCategory},
    types::{
        AccountProfile, ActivityItem, BackendEvent, MemberSummary, Message, MessageState,
        ProfileField, ProfileGroup, RosterEntry, SendAck, ThreadId, ThreadSummary, UserId,
    },
    wire::{
        BetterMessagesRecord, BetterMessagesThread, BuddyPressActivity, BuddyPressMember,
        BuddyPressRecord, BuddyPressThread, LastActivity, ThreadListing, XProfileField,
        XProfileGroup, lenient,
    },
};

const DEFAULT_THREAD_TITLE: &str = "Conversation";
const DEFAULT_PROFILE_GROUP: &str = "Profile";
const ANONYMOUS_KEY_PREFIX: &str = "srv-anon-";
const EPOCH_SECONDS_CEILING: u64 = 100_000_000_000;
const EPOCH_MILLIS_CEILING: u64 = 100_000_000_000_000;

/// Normalized content of one thread-listing fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadPage {
    pub threads: Vec<ThreadSummary>,
    pub messages: Vec<Message>,
    pub roster: Vec<RosterEntry>,
}

/// Remove markup tags. Lossy: entities are not unescaped and a
/// stray `<` swallows text up to the next `>`.
pub fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Canonical form of a body for content comparison.
pub fn body_match_key(body: &str) -> String {
    strip_html(body).trim().to_lowercase()
}

/// Normalize a Better Messages record.
pub fn normalize_better_message(
    record: &BetterMessagesRecord,
    fallback_thread_id: Option<ThreadId>,
    now_ms: u64,
) -> Message {
    let thread_id = record.thread_id.or(fallback_thread_id).unwrap_or_default();
    let body = record
        .message
        .as_deref()
        .map(|text| strip_html(text).trim().to_owned())
        .unwrap_or_default();
    let timestamp_ms = derive_timestamp_ms(
        record.created_at.as_ref(),
        [record.date_sent.as_deref()],
        now_ms,
    );

    let mut message = build_confirmed(
        record.message_id.or(record.id),
        thread_id,
        record.sender_id,
        body,
        timestamp_ms,
    );
    message.client_token = record.temp_id.clone().filter(|token| !token.is_empty());
    message
}

/// Normalize a BuddyPress record.
pub fn normalize_buddypress_message(
    record: &BuddyPressRecord,
    fallback_thread_id: Option<ThreadId>,
    now_ms: u64,
) -> Message {
    let thread_id = record.thread_id.or(fallback_thread_id).unwrap_or_default();
    let body = record
        .message
        .as_ref()
        .and_then(|text| text.best())
        .map(|text| strip_html(text).trim().to_owned())
        .unwrap_or_default();
    let timestamp_ms = derive_timestamp_ms(
        None,
        [record.date_sent_gmt.as_deref(), record.date_sent.as_deref()],
        now_ms,
    );

    build_confirmed(record.id, thread_id, record.sender_id, body, timestamp_ms)
}

/// Normalize the messages of a BuddyPress thread object.
pub fn normalize_buddypress_thread(thread: &BuddyPressThread, now_ms: u64) -> Vec<Message> {
    let mut messages: Vec<Message> = thread
        .messages
        .iter()
        .map(|record| normalize_buddypress_message(record, Some(thread.id), now_ms))
        .collect();
    number_repeated_fingerprints(&mut messages);
    messages
}

/// Normalize a `{threads, messages, users}` listing.
///
/// `account` is used to drop the logged-in user from thread titles when its
/// id is known.
pub fn normalize_thread_listing(
    listing: &ThreadListing,
    account_id: Option<UserId>,
    now_ms: u64,
) -> ThreadPage {
    let roster: Vec<RosterEntry> = listing
        .users
        .iter()
        .map(|user| RosterEntry {
            user_id: user.user_id,
            name: user.name.clone().unwrap_or_default(),
            slug: user.slug.clone(),
            avatar: user.avatar.clone(),
        })
        .collect();
    let names: HashMap<UserId, &str> = roster
        .iter()
        .filter(|entry| !entry.name.is_empty())
        .map(|entry| (entry.user_id, entry.name.as_str()))
        .collect();

    let mut messages: Vec<Message> = listing
        .messages
        .iter()
        .map(|record| normalize_better_message(record, None, now_ms))
        .collect();
    number_repeated_fingerprints(&mut messages);

    let threads = listing
        .threads
        .iter()
        .map(|thread| summarize_thread(thread, &messages, &names, account_id))
        .collect();

    ThreadPage {
        threads,
        messages,
        roster,
    }
}

fn summarize_thread(
    thread: &BetterMessagesThread,
    messages: &[Message],
    names: &HashMap<UserId, &str>,
    account_id: Option<UserId>,
) -> ThreadSummary {
    let participants: Vec<UserId> = thread.participants.iter().map(|p| p.user_id()).collect();
    let title = participant_title(&participants, names, account_id).unwrap_or_else(|| {
        thread
            .subject
            .as_deref()
            .or(thread.title.as_deref())
            .map(|text| strip_html(text).trim().to_owned())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| DEFAULT_THREAD_TITLE.to_owned())
    });

    let newest = messages
        .iter()
        .filter(|message| message.thread_id == thread.thread_id)
        .max_by_key(|message| message.timestamp_ms);

    let last_message = newest
        .map(|message| message.body.clone())
        .or_else(|| {
            thread
                .last_message
                .as_deref()
                .map(|text| strip_html(text).trim().to_owned())
        })
        .filter(|text| !text.is_empty());
    let last_activity_ms = newest.map(|message| message.timestamp_ms).or_else(|| {
        thread
            .last_time
            .as_ref()
            .and_then(lenient::value_to_u64)
            .map(epoch_to_millis)
    });

    ThreadSummary {
        thread_id: thread.thread_id,
        title,
        participants,
        last_message,
        last_activity_ms,
        unread_count: thread.unread.unwrap_or(0),
    }
}

fn participant_title(
    participants: &[UserId],
    names: &HashMap<UserId, &str>,
    account_id: Option<UserId>,
) -> Option<String> {
    let participant_names: Vec<&str> = participants
        .iter()
        .filter(|user_id| Some(**user_id) != account_id)
        .filter_map(|user_id| names.get(user_id).copied())
        .collect();
    (!participant_names.is_empty()).then(|| participant_names.join(", "))
}

/// Recompute participant-derived titles once the account id is known.
/// Threads without named non-self participants keep their title.
pub fn retitle_threads(
    threads: &mut [ThreadSummary],
    roster: &[RosterEntry],
    account_id: Option<UserId>,
) {
    let names: HashMap<UserId, &str> = roster
        .iter()
        .filter(|entry| !entry.name.is_empty())
        .map(|entry| (entry.user_id, entry.name.as_str()))
        .collect();
    for thread in threads {
        if let Some(title) = participant_title(&thread.participants, &names, account_id) {
            thread.title = title;
        }
    }
}

fn build_confirmed(
    id: Option<u64>,
    thread_id: ThreadId,
    sender_id: Option<UserId>,
    body: String,
    timestamp_ms: u64,
) -> Message {
    match id {
        Some(id) => Message::confirmed(id, thread_id, sender_id, body, timestamp_ms),
        None => {
            let local_key = fingerprint_key(thread_id, sender_id, &body);
            warn!(thread_id, %local_key, "server record without id; using content fingerprint");
            Message {
                id: None,
                local_key,
                thread_id,
                sender_id,
                body,
                timestamp_ms,
                state: MessageState::Confirmed,
                expires_at_ms: None,
                client_token: None,
            }
        }
    }
}

/// Key for an id-less record. The timestamp is left out: without a usable
/// date it is the normalization time and differs on every fetch.
fn fingerprint_key(thread_id: ThreadId, sender_id: Option<UserId>, body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    thread_id.hash(&mut hasher);
    sender_id.hash(&mut hasher);
    body.hash(&mut hasher);
    format!("{ANONYMOUS_KEY_PREFIX}{:016x}", hasher.finish())
}

/// Suffix the second and later copies of a fingerprint within one fetch
/// (`-1`, `-2`, ...) so identical id-less records stay distinct.
fn number_repeated_fingerprints(messages: &mut [Message]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for message in messages.iter_mut().filter(|message| {
        message.id.is_none() && message.local_key.starts_with(ANONYMOUS_KEY_PREFIX)
    }) {
        let count = seen.entry(message.local_key.clone()).or_insert(0);
        if *count > 0 {
            message.local_key = format!("{}-{count}", message.local_key);
        }
        *count += 1;
    }
}

fn derive_timestamp_ms<'a>(
    epoch: Option<&Value>,
    iso_candidates: impl IntoIterator<Item = Option<&'a str>>,
    now_ms: u64,
) -> u64 {
    if let Some(millis) = epoch.and_then(lenient::value_to_u64).filter(|v| *v > 0) {
        return epoch_to_millis(millis);
    }

    for candidate in iso_candidates.into_iter().flatten() {
        if let Some(millis) = parse_iso_millis(candidate) {
            return millis;
        }
        trace!(value = candidate, "unparseable sent date");
    }

    warn!("message record has no usable timestamp; using normalization time");
    now_ms
}

/// Scale an epoch value to milliseconds based on its magnitude.
fn epoch_to_millis(value: u64) -> u64 {
    if value < EPOCH_SECONDS_CEILING {
        value.saturating_mul(1_000)
    } else if value < EPOCH_MILLIS_CEILING {
        value
    } else {
        value / 1_000
    }
}

fn parse_iso_millis(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return u64::try_from(parsed.timestamp_millis()).ok();
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .and_then(|naive| u64::try_from(naive.and_utc().timestamp_millis()).ok())
}

/// Parse the token endpoint's profile fields into an [`AccountProfile`].
pub fn account_profile_from_token_response(username: &str, payload: &Value) -> AccountProfile {
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    };

    AccountProfile {
        user_id: payload
            .get("user_id")
            .or_else(|| payload.get("id"))
            .and_then(lenient::value_to_u64)
            .filter(|id| *id > 0),
        username: username.to_owned(),
        email: text("user_email"),
        nicename: text("user_nicename"),
        display_name: text("user_display_name"),
    }
}

/// Normalize a BuddyPress member record.
///
/// Avatar precedence: `hires_avatar.large`, `hires_avatar.full`,
/// `avatar_urls.full`, `avatar_urls.thumb`.
pub fn normalize_member(member: &BuddyPressMember) -> MemberSummary {
    let non_empty = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    };

    let slug = non_empty(&member.mention_name).or_else(|| non_empty(&member.user_login));
    let name = non_empty(&member.name)
        .map(|name| strip_html(&name))
        .or_else(|| slug.clone())
        .unwrap_or_else(|| format!("#{}", member.id));
    let avatar = member
        .hires_avatar
        .as_ref()
        .and_then(|hires| non_empty(&hires.large).or_else(|| non_empty(&hires.full)))
        .or_else(|| {
            member
                .avatar_urls
                .as_ref()
                .and_then(|urls| non_empty(&urls.full).or_else(|| non_empty(&urls.thumb)))
        });
    let last_active = member.last_activity.as_ref().and_then(|activity| match activity {
        LastActivity::Text(text) => Some(text.clone()),
        LastActivity::Detail { timediff, date } => non_empty(timediff).or_else(|| non_empty(date)),
    });

    MemberSummary {
        user_id: member.id,
        name,
        slug,
        avatar,
        last_active,
    }
}

/// Convert an activity stream item. Dates are optional here; an item without
/// one keeps `timestamp_ms: None` instead of borrowing the current time.
pub fn normalize_activity(item: &BuddyPressActivity) -> ActivityItem {
    let plain = |html: &str| strip_html(html).trim().to_owned();
    let timestamp_ms = [item.date_gmt.as_deref(), item.date.as_deref()]
        .into_iter()
        .flatten()
        .find_map(parse_iso_millis);
    let avatar = item
        .user_avatar
        .as_ref()
        .and_then(|urls| urls.full.as_deref().or(urls.thumb.as_deref()))
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToOwned::to_owned);

    ActivityItem {
        id: item.id,
        user_id: item.user_id,
        title: item.title.as_deref().map(plain).unwrap_or_default(),
        content: item
            .content
            .as_ref()
            .and_then(|content| content.best())
            .map(plain)
            .unwrap_or_default(),
        timestamp_ms,
        avatar,
    }
}

/// Convert extended-profile groups, dropping fields without a value.
pub fn normalize_profile_groups(groups: &[XProfileGroup]) -> Vec<ProfileGroup> {
    groups
        .iter()
        .map(|group| ProfileGroup {
            name: group
                .name
                .as_deref()
                .map(|name| strip_html(name).trim().to_owned())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_PROFILE_GROUP.to_owned()),
            fields: group
                .fields
                .iter()
                .flatten()
                .filter_map(normalize_profile_field)
                .collect(),
        })
        .collect()
}

/// Field value precedence: `value.raw`, `value.rendered`, `data.value.raw`,
/// `data.value.rendered`, then `value` and `data.value` as plain scalars.
fn normalize_profile_field(field: &XProfileField) -> Option<ProfileField> {
    let name = field
        .name
        .as_deref()
        .map(|name| strip_html(name).trim().to_owned())
        .filter(|name| !name.is_empty())?;
    let nested = |value: Option<&Value>| {
        value.and_then(|value| {
            value
                .get("raw")
                .and_then(scalar_text)
                .or_else(|| value.get("rendered").and_then(scalar_text))
        })
    };
    let data_value = field.data.as_ref().and_then(|data| data.get("value"));

    let value = nested(field.value.as_ref())
        .or_else(|| nested(data_value))
        .or_else(|| field.value.as_ref().and_then(scalar_text))
        .or_else(|| data_value.and_then(scalar_text))?;
    Some(ProfileField { name, value })
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => strip_html(text),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

/// Internal helper describing send success/failure before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server accepted the message.
    Accepted,
    /// Send failed; the provisional body is handed back for the input field.
    Failed {
        error: BackendError,
        restore_body: Option<String>,
    },
}

/// Convert a send outcome to a stable `BackendEvent::SendAck`.
pub fn normalize_send_outcome(
    thread_id: ThreadId,
    local_key: impl Into<String>,
    outcome: SendOutcome,
) -> BackendEvent {
    let local_key = local_key.into();
    match outcome {
        SendOutcome::Accepted => BackendEvent::SendAck(SendAck {
            thread_id,
            local_key,
            accepted: true,
            error_code: None,
            restore_body: None,
        }),
        SendOutcome::Failed {
            error,
            restore_body,
        } => BackendEvent::SendAck(SendAck {
            thread_id,
            local_key,
            accepted: false,
            error_code: Some(error.code),
            restore_body,
        }),
    }
}

/// Convert a generic send failure message to a default network-classified error.
pub fn classify_send_error_message(message: impl Into<String>) -> BackendError {
    BackendError::new(BackendErrorCategory::Network, "send_failed", message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RenderedText;
    use serde_json::json;

    const NOW: u64 = 1_731_000_999_000;

    #[test]
    fn strips_tags_but_keeps_entities() {
        assert_eq!(strip_html("<p>Hi <b>there</b> &amp; you</p>"), "Hi there &amp; you");
        assert_eq!(strip_html("no markup"), "no markup");
        assert_eq!(body_match_key("  <p>HeLLo</p>\n"), "hello");
    }

    #[test]
    fn prefers_numeric_epoch_over_iso_date() {
        let record = BetterMessagesRecord {
            message_id: Some(1),
            thread_id: Some(7),
            sender_id: Some(2),
            message: Some("<p>hi</p>".into()),
            created_at: Some(json!("1731000000000")),
            date_sent: Some("2020-01-01T00:00:00Z".into()),
            ..BetterMessagesRecord::default()
        };

        let message = normalize_better_message(&record, None, NOW);
        assert_eq!(message.timestamp_ms, 1_731_000_000_000);
        assert_eq!(message.body, "hi");
        assert_eq!(message.id, Some(1));
        assert_eq!(message.state, MessageState::Confirmed);
        assert_eq!(message.local_key, "srv-1");
    }

    #[test]
    fn scales_epoch_seconds_and_micros() {
        assert_eq!(epoch_to_millis(1_731_000_000), 1_731_000_000_000);
        assert_eq!(epoch_to_millis(1_731_000_000_000), 1_731_000_000_000);
        assert_eq!(epoch_to_millis(1_731_000_000_000_000), 1_731_000_000_000);
    }

    #[test]
    fn falls_back_to_iso_then_now() {
        let iso = BetterMessagesRecord {
            message_id: Some(2),
            created_at: Some(json!("not-a-number")),
            date_sent: Some("2024-11-07 10:00:00".into()),
            ..BetterMessagesRecord::default()
        };
        assert_eq!(
            normalize_better_message(&iso, Some(7), NOW).timestamp_ms,
            1_730_973_600_000
        );

        let nothing = BetterMessagesRecord {
            message_id: Some(3),
            date_sent: Some("yesterday".into()),
            ..BetterMessagesRecord::default()
        };
        let message = normalize_better_message(&nothing, Some(7), NOW);
        assert_eq!(message.timestamp_ms, NOW);
        assert_eq!(message.thread_id, 7);
        assert_eq!(message.body, "");
    }

    #[test]
    fn buddypress_prefers_gmt_date() {
        let record = BuddyPressRecord {
            id: Some(10),
            thread_id: None,
            sender_id: Some(1),
            message: Some(RenderedText::Rendered {
                raw: None,
                rendered: Some("<p>o cześć</p>".into()),
            }),
            date_sent: Some("2024-11-07T12:00:00".into()),
            date_sent_gmt: Some("2024-11-07T10:00:00".into()),
        };

        let message = normalize_buddypress_message(&record, Some(7), NOW);
        assert_eq!(message.thread_id, 7);
        assert_eq!(message.body, "o cześć");
        assert_eq!(message.timestamp_ms, 1_730_973_600_000);
    }

    #[test]
    fn records_without_id_get_stable_fingerprint_keys() {
        let record = BetterMessagesRecord {
            thread_id: Some(7),
            sender_id: Some(1),
            message: Some("hi".into()),
            created_at: Some(json!(1_731_000_000_000u64)),
            ..BetterMessagesRecord::default()
        };

        let a = normalize_better_message(&record, None, NOW);
        let b = normalize_better_message(&record, None, NOW + 5);
        assert_eq!(a.id, None);
        assert!(a.local_key.starts_with("srv-anon-"));
        assert_eq!(a.local_key, b.local_key);

        let undated = BetterMessagesRecord {
            created_at: None,
            ..record
        };
        let first = normalize_better_message(&undated, None, NOW);
        let later = normalize_better_message(&undated, None, NOW + 5_000);
        assert_ne!(first.timestamp_ms, later.timestamp_ms);
        assert_eq!(first.local_key, later.local_key);
    }

    #[test]
    fn repeated_idless_records_in_one_fetch_get_numbered_keys() {
        let listing: ThreadListing = serde_json::from_value(json!({
            "messages": [
                { "thread_id": 7, "sender_id": 2, "message": "ok" },
                { "thread_id": 7, "sender_id": 2, "message": "ok" },
                { "message_id": 4, "thread_id": 7, "sender_id": 2, "message": "ok" }
            ]
        }))
        .expect("listing should parse");

        let page = normalize_thread_listing(&listing, None, NOW);
        let keys: Vec<&str> = page.messages.iter().map(|m| m.local_key.as_str()).collect();
        assert_eq!(keys[1], format!("{}-1", keys[0]));
        assert_eq!(keys[2], "srv-4");
    }

    #[test]
    fn listing_titles_skip_the_account_and_fall_back_to_subject() {
        let listing: ThreadListing = serde_json::from_value(json!({
            "threads": [
                { "thread_id": 7, "participants": [1, 335], "subject": "Hej" },
                { "thread_id": 8, "participants": [335], "subject": "<b>Hej</b>" },
                { "thread_id": 9, "participants": [] }
            ],
            "messages": [
                { "message_id": 1, "thread_id": 7, "sender_id": 1, "message": "old", "created_at": 1000 },
                { "message_id": 2, "thread_id": 7, "sender_id": 335, "message": "new", "created_at": 2000 }
            ],
            "users": [
                { "user_id": 1, "name": "Artur" },
                { "user_id": 335, "name": "Aneta" }
            ]
        }))
        .expect("listing should parse");

        let page = normalize_thread_listing(&listing, Some(335), NOW);
        assert_eq!(page.threads[0].title, "Artur");
        assert_eq!(page.threads[0].last_message.as_deref(), Some("new"));
        assert_eq!(page.threads[0].last_activity_ms, Some(2_000_000));
        assert_eq!(page.threads[1].title, "Hej");
        assert_eq!(page.threads[2].title, DEFAULT_THREAD_TITLE);
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.roster.len(), 2);
    }

    #[test]
    fn parses_token_response_profile() {
        let profile = account_profile_from_token_response(
            "aneta",
            &json!({
                "token": "abc",
                "user_email": "a@example.org",
                "user_nicename": "aneta",
                "user_display_name": "Aneta",
                "user_id": "335"
            }),
        );
        assert_eq!(profile.user_id, Some(335));
        assert_eq!(profile.display_name.as_deref(), Some("Aneta"));

        let without_id = account_profile_from_token_response("x", &json!({ "token": "abc" }));
        assert_eq!(without_id.user_id, None);
        assert_eq!(without_id.display_name, None);
    }

    #[test]
    fn maps_failed_send_to_ack_with_restore_body() {
        let event = normalize_send_outcome(
            7,
            "local-a-1",
            SendOutcome::Failed {
                error: classify_send_error_message("connection reset"),
                restore_body: Some("Hello".into()),
            },
        );

        match event {
            BackendEvent::SendAck(ack) => {
                assert_eq!(ack.thread_id, 7);
                assert_eq!(ack.local_key, "local-a-1");
                assert!(!ack.accepted);
                assert_eq!(ack.error_code.as_deref(), Some("send_failed"));
                assert_eq!(ack.restore_body.as_deref(), Some("Hello"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn maps_accepted_send_to_ack() {
        match normalize_send_outcome(7, "local-a-2", SendOutcome::Accepted) {
            BackendEvent::SendAck(ack) => {
                assert!(ack.accepted);
                assert_eq!(ack.error_code, None);
                assert_eq!(ack.restore_body, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn member_normalization_prefers_hires_avatar_and_name() {
        let member: BuddyPressMember = serde_json::from_value(json!({
            "id": 42,
            "name": "",
            "user_login": "aneta",
            "hires_avatar": { "full": "https://example.org/hi.jpg" },
            "avatar_urls": { "full": "https://example.org/lo.jpg" },
            "last_activity": "yesterday"
        }))
        .expect("member should parse");

        let summary = normalize_member(&member);
        assert_eq!(summary.user_id, 42);
        assert_eq!(summary.name, "aneta");
        assert_eq!(summary.slug.as_deref(), Some("aneta"));
        assert_eq!(summary.avatar.as_deref(), Some("https://example.org/hi.jpg"));
        assert_eq!(summary.last_active.as_deref(), Some("yesterday"));
    }

    #[test]
    fn member_without_names_gets_id_label() {
        let member: BuddyPressMember =
            serde_json::from_value(json!({ "id": 9 })).expect("member should parse");
        let summary = normalize_member(&member);
        assert_eq!(summary.name, "#9");
        assert_eq!(summary.avatar, None);
    }

    #[test]
    fn activity_items_are_plain_text_with_optional_dates() {
        let items: Vec<BuddyPressActivity> = serde_json::from_value(json!([
            {
                "id": 91,
                "user_id": 335,
                "title": "<a href=\"https://example.org/members/aneta\">Aneta</a> posted an update",
                "content": { "rendered": "<p>Hej wszystkim</p>\n" },
                "date": "2024-11-07T11:00:00",
                "date_gmt": "2024-11-07T10:00:00",
                "user_avatar": { "full": "", "thumb": "https://example.org/t.jpg" }
            },
            { "id": 92, "title": "Artur joined", "date": "last week" }
        ]))
        .expect("activity should parse");

        let first = normalize_activity(&items[0]);
        assert_eq!(first.title, "Aneta posted an update");
        assert_eq!(first.content, "Hej wszystkim");
        assert_eq!(first.timestamp_ms, Some(1_730_973_600_000));
        assert_eq!(first.avatar, None);

        let second = normalize_activity(&items[1]);
        assert_eq!(second.content, "");
        assert_eq!(second.timestamp_ms, None);
        assert_eq!(second.user_id, None);
    }

    #[test]
    fn profile_fields_follow_value_precedence_and_drop_empties() {
        let groups: Vec<XProfileGroup> = serde_json::from_value(json!([
            {
                "name": "Base",
                "fields": [
                    { "name": "Name", "value": { "raw": "Aneta", "rendered": "<p>Aneta</p>" } },
                    { "name": "City", "value": { "raw": "", "rendered": "<p>Kraków</p>" } },
                    { "name": "About", "data": { "value": { "raw": "Lubię góry" } } },
                    { "name": "Age", "value": "31" },
                    { "name": "Height", "data": { "value": 170 } },
                    { "name": "Empty", "value": { "raw": "", "rendered": "" } },
                    { "value": "orphan" }
                ]
            },
            { "name": "", "fields": null }
        ]))
        .expect("groups should parse");

        let groups = normalize_profile_groups(&groups);
        let values: Vec<(&str, &str)> = groups[0]
            .fields
            .iter()
            .map(|field| (field.name.as_str(), field.value.as_str()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("Name", "Aneta"),
                ("City", "Kraków"),
                ("About", "Lubię góry"),
                ("Age", "31"),
                ("Height", "170"),
            ]
        );
        assert_eq!(groups[1].name, DEFAULT_PROFILE_GROUP);
        assert!(groups[1].fields.is_empty());
    }

    #[test]
    fn retitle_drops_resolved_account_from_titles() {
        let roster = vec![
            RosterEntry {
                user_id: 1,
                name: "Artur".into(),
                slug: None,
                avatar: None,
            },
            RosterEntry {
                user_id: 335,
                name: "Aneta".into(),
                slug: None,
                avatar: None,
            },
        ];
        let mut threads = vec![ThreadSummary {
            thread_id: 7,
            title: "Artur, Aneta".into(),
            participants: vec![1, 335],
            last_message: None,
            last_activity_ms: None,
            unread_count: 0,
        }];

        retitle_threads(&mut threads, &roster, Some(335));
        assert_eq!(threads[0].title, "Artur");
    }
}
