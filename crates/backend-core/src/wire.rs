//! Raw record shapes as delivered by the two messaging APIs.
//!
//! Each backend variant gets its own struct. Fields the plugins sometimes send
//! as numbers and sometimes as numeric strings go through the `lenient`
//! helpers. Everything beyond identifiers is optional, because the
//! normalizer must never reject a record.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Message record from the Better Messages plugin.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct BetterMessagesRecord {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub message_id: Option<u64>,
    /// Some plugin versions only send `id`.
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub thread_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub sender_id: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
    /// Epoch timestamp; number or numeric string, unit varies by plugin version.
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub date_sent: Option<String>,
    #[serde(default, alias = "tempId")]
    pub temp_id: Option<String>,
}

/// Text field that BuddyPress sends either raw or as `{raw, rendered}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RenderedText {
    Plain(String),
    Rendered {
        #[serde(default)]
        raw: Option<String>,
        #[serde(default)]
        rendered: Option<String>,
    },
}

impl RenderedText {
    /// Raw text when present, otherwise the rendered variant.
    pub fn best(&self) -> Option<&str> {
        match self {
            Self::Plain(text) => Some(text),
            Self::Rendered { raw, rendered } => raw
                .as_deref()
                .filter(|raw| !raw.trim().is_empty())
                .or(rendered.as_deref()),
        }
    }
}

/// Message record from the BuddyPress messages endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct BuddyPressRecord {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub thread_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub sender_id: Option<u64>,
    #[serde(default)]
    pub message: Option<RenderedText>,
    #[serde(default)]
    pub date_sent: Option<String>,
    #[serde(default)]
    pub date_sent_gmt: Option<String>,
}

/// Participant reference inside a thread: bare id or `{user_id}` object.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParticipantRef {
    Object {
        #[serde(deserialize_with = "lenient::u64")]
        user_id: u64,
    },
    Id(#[serde(deserialize_with = "lenient::u64")] u64),
}

impl ParticipantRef {
    pub fn user_id(&self) -> u64 {
        match self {
            Self::Object { user_id } | Self::Id(user_id) => *user_id,
        }
    }
}

/// Thread record from the Better Messages listing.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct BetterMessagesThread {
    #[serde(deserialize_with = "lenient::u64")]
    pub thread_id: u64,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participants: Vec<ParticipantRef>,
    #[serde(default, alias = "lastMessage")]
    pub last_message: Option<String>,
    #[serde(default, alias = "lastTime")]
    pub last_time: Option<Value>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub unread: Option<u64>,
}

/// User record from the Better Messages listing.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct BetterMessagesUser {
    #[serde(deserialize_with = "lenient::u64")]
    pub user_id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// `{threads, messages, users}` payload of the Better Messages listing and
/// single-thread endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ThreadListing {
    #[serde(default)]
    pub threads: Vec<BetterMessagesThread>,
    #[serde(default)]
    pub messages: Vec<BetterMessagesRecord>,
    #[serde(default)]
    pub users: Vec<BetterMessagesUser>,
}

/// Thread object from the BuddyPress fallback endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct BuddyPressThread {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,
    #[serde(default)]
    pub subject: Option<RenderedText>,
    #[serde(default)]
    pub messages: Vec<BuddyPressRecord>,
}

/// BuddyPress answers single-thread reads with either an object or a
/// one-element array depending on version.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// `avatar_urls` block of a BuddyPress member.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct AvatarUrls {
    #[serde(default)]
    pub full: Option<String>,
    #[serde(default)]
    pub thumb: Option<String>,
}

/// `hires_avatar` block added by the dating theme.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct HiresAvatar {
    #[serde(default)]
    pub large: Option<String>,
    #[serde(default)]
    pub full: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LastActivity {
    Text(String),
    Detail {
        #[serde(default)]
        timediff: Option<String>,
        #[serde(default)]
        date: Option<String>,
    },
}

/// Member record from `/buddypress/v1/members` and the matches endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct BuddyPressMember {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mention_name: Option<String>,
    #[serde(default)]
    pub user_login: Option<String>,
    #[serde(default)]
    pub avatar_urls: Option<AvatarUrls>,
    #[serde(default)]
    pub hires_avatar: Option<HiresAvatar>,
    #[serde(default)]
    pub last_activity: Option<LastActivity>,
}

/// The matches endpoint answers with a bare list or a `{matches}` wrapper.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MatchesPayload {
    List(Vec<BuddyPressMember>),
    Wrapped {
        #[serde(default)]
        matches: Vec<BuddyPressMember>,
    },
}

impl MatchesPayload {
    pub fn into_members(self) -> Vec<BuddyPressMember> {
        match self {
            Self::List(members) | Self::Wrapped { matches: members } => members,
        }
    }
}

/// Item from `/buddypress/v1/activity`.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct BuddyPressActivity {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub user_id: Option<u64>,
    /// HTML headline.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<RenderedText>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub date_gmt: Option<String>,
    #[serde(default)]
    pub user_avatar: Option<AvatarUrls>,
}

/// Group from `/buddypress/v1/xprofile/groups?fetch_fields=true`.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct XProfileGroup {
    #[serde(default)]
    pub name: Option<String>,
    /// `null` when the group has no fields.
    #[serde(default)]
    pub fields: Option<Vec<XProfileField>>,
}

/// Field inside an xprofile group.
///
/// The value moved between plugin versions: either `value` (string or
/// `{raw, rendered}`) or `data.value`, so both are kept untyped.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct XProfileField {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Thread id out of a `getPrivateThread` or `thread/new` answer: `thread_id`,
/// then `id`, then the bare value.
pub fn thread_id_from_response(value: &Value) -> Option<u64> {
    value
        .get("thread_id")
        .or_else(|| value.get("id"))
        .and_then(lenient::value_to_u64)
        .or_else(|| lenient::value_to_u64(value))
        .filter(|id| *id > 0)
}

/// Deserializers that accept numbers or numeric strings.
pub mod lenient {
    use super::*;
    use serde::de::Error;

    /// Interpret a JSON value as an unsigned integer.
    pub fn value_to_u64(value: &Value) -> Option<u64> {
        match value {
            Value::Number(number) => number
                .as_u64()
                .or_else(|| number.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(text) => {
                let text = text.trim();
                text.parse::<u64>()
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
            }
            _ => None,
        }
    }

    pub fn u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        value_to_u64(&value)
            .ok_or_else(|| D::Error::custom(format!("expected numeric id, got {value}")))
    }

    pub fn opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(value_to_u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn better_messages_record_accepts_string_ids() {
        let record: BetterMessagesRecord = serde_json::from_value(json!({
            "message_id": "501",
            "thread_id": 7,
            "sender_id": "335",
            "message": "<p>Co słychać</p>",
            "created_at": "1731000000000",
            "tempId": "local-x-1"
        }))
        .expect("record should parse");

        assert_eq!(record.message_id, Some(501));
        assert_eq!(record.thread_id, Some(7));
        assert_eq!(record.sender_id, Some(335));
        assert_eq!(record.temp_id.as_deref(), Some("local-x-1"));
    }

    #[test]
    fn better_messages_record_tolerates_missing_and_garbage_fields() {
        let record: BetterMessagesRecord = serde_json::from_value(json!({
            "thread_id": "seven",
            "sender_id": null
        }))
        .expect("record should parse");

        assert_eq!(record.message_id, None);
        assert_eq!(record.thread_id, None);
        assert_eq!(record.sender_id, None);
        assert_eq!(record.message, None);
    }

    #[test]
    fn buddypress_text_prefers_raw_over_rendered() {
        let record: BuddyPressRecord = serde_json::from_value(json!({
            "id": 3,
            "thread_id": 7,
            "sender_id": 1,
            "message": { "raw": "hello", "rendered": "<p>hello</p>" },
            "date_sent": "2024-11-07T10:00:00"
        }))
        .expect("record should parse");

        let text = record.message.expect("message present");
        assert_eq!(text.best(), Some("hello"));

        let rendered_only = RenderedText::Rendered {
            raw: Some("  ".into()),
            rendered: Some("<p>x</p>".into()),
        };
        assert_eq!(rendered_only.best(), Some("<p>x</p>"));
    }

    #[test]
    fn listing_accepts_bare_and_object_participants() {
        let listing: ThreadListing = serde_json::from_value(json!({
            "threads": [
                { "thread_id": 7, "participants": [1, { "user_id": "335" }], "unread": "2" }
            ],
            "users": [ { "user_id": 335, "name": "Aneta" } ]
        }))
        .expect("listing should parse");

        let ids: Vec<u64> = listing.threads[0]
            .participants
            .iter()
            .map(ParticipantRef::user_id)
            .collect();
        assert_eq!(ids, vec![1, 335]);
        assert_eq!(listing.threads[0].unread, Some(2));
        assert!(listing.messages.is_empty());
    }

    #[test]
    fn buddypress_thread_payload_may_be_array_or_object() {
        let one: OneOrMany<BuddyPressThread> =
            serde_json::from_value(json!({ "id": 7, "messages": [] })).expect("object form");
        let many: OneOrMany<BuddyPressThread> =
            serde_json::from_value(json!([{ "id": 7 }, { "id": 8 }])).expect("array form");

        assert_eq!(one.into_vec().len(), 1);
        assert_eq!(many.into_vec().len(), 2);
    }

    #[test]
    fn member_record_reads_avatars_and_activity() {
        let member: BuddyPressMember = serde_json::from_value(json!({
            "id": "42",
            "name": "Aneta",
            "mention_name": "aneta-k",
            "avatar_urls": { "full": "https://example.org/a.jpg" },
            "last_activity": { "timediff": "2 hours ago", "date": "2024-11-07 10:00:00" }
        }))
        .expect("member should parse");

        assert_eq!(member.id, 42);
        assert_eq!(
            member.avatar_urls.and_then(|urls| urls.full).as_deref(),
            Some("https://example.org/a.jpg")
        );
        assert!(matches!(member.last_activity, Some(LastActivity::Detail { .. })));
    }

    #[test]
    fn matches_payload_accepts_list_or_wrapper() {
        let list: MatchesPayload =
            serde_json::from_value(json!([{ "id": 1 }, { "id": 2 }])).expect("list form");
        let wrapped: MatchesPayload =
            serde_json::from_value(json!({ "matches": [{ "id": 3 }] })).expect("wrapped form");

        assert_eq!(list.into_members().len(), 2);
        assert_eq!(wrapped.into_members()[0].id, 3);
    }

    #[test]
    fn activity_and_xprofile_records_parse_loosely() {
        let activity: Vec<BuddyPressActivity> = serde_json::from_value(json!([
            {
                "id": 91,
                "user_id": "335",
                "title": "<a href=\"#\">Aneta</a> posted an update",
                "content": { "rendered": "<p>Hej wszystkim</p>" },
                "date": "2024-11-07T10:00:00",
                "user_avatar": { "full": "https://example.org/a.jpg" }
            },
            { "id": "92", "content": null }
        ]))
        .expect("activity should parse");
        assert_eq!(activity[0].user_id, Some(335));
        assert_eq!(activity[1].id, 92);
        assert_eq!(activity[1].content, None);

        let groups: Vec<XProfileGroup> = serde_json::from_value(json!([
            {
                "name": "Base",
                "fields": [
                    { "name": "City", "value": { "raw": "Kraków", "unserialized": ["Kraków"] } },
                    { "name": "Age", "data": { "value": 31 } }
                ]
            },
            { "name": "Empty", "fields": null }
        ]))
        .expect("groups should parse");
        assert_eq!(groups[0].fields.as_ref().map(Vec::len), Some(2));
        assert_eq!(groups[1].fields, None);
    }

    #[test]
    fn private_thread_id_precedence() {
        assert_eq!(thread_id_from_response(&json!({ "thread_id": "12", "id": 3 })), Some(12));
        assert_eq!(thread_id_from_response(&json!({ "id": 3 })), Some(3));
        assert_eq!(thread_id_from_response(&json!(44)), Some(44));
        assert_eq!(thread_id_from_response(&json!({ "result": true })), None);
        assert_eq!(thread_id_from_response(&json!(0)), None);
    }
}
