use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const REACTION_EMOJIS: [&str; 4] = ["🔥", "💡", "❓", "❤️"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForumStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl ForumStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForumStatus::Active => "active",
            ForumStatus::Inactive => "inactive",
            ForumStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForumMetadata {
    #[serde(default)]
    pub status: ForumStatus,
    #[serde(default, deserialize_with = "null_default")]
    pub view_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forum {
    #[serde(default, deserialize_with = "lenient_id_required")]
    pub forum_id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub game_title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub category: String,
    #[serde(default, deserialize_with = "null_default")]
    pub created_by: String,
    #[serde(default, deserialize_with = "null_default")]
    pub is_private: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub allowed_users: Vec<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub metadata: ForumMetadata,
    #[serde(default, deserialize_with = "null_default")]
    pub posts: Vec<Post>,
}

impl Forum {
    pub fn is_archived(&self) -> bool {
        self.metadata.status == ForumStatus::Archived
    }

    pub fn find_post(&self, id: &str) -> Option<&Post> {
        self.posts
            .iter()
            .find(|post| post.id.as_deref() == Some(id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type", default, deserialize_with = "null_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.kind == "image" && !self.url.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMetadata {
    #[serde(default, deserialize_with = "null_default")]
    pub attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "null_default")]
    pub reactions: BTreeMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "null_default")]
    pub likes: u64,
    #[serde(default, deserialize_with = "null_default")]
    pub liked_by: Vec<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub edited: bool,
    #[serde(
        default,
        deserialize_with = "lenient_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub edited_at: Option<DateTime<Utc>>,
}

/// A single forum entry as delivered by the topic endpoint.
///
/// The record is read-only from this crate's point of view; reply relationships are derived
/// on every pass by [`crate::thread::linearize`] and never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(
        rename = "_id",
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub message: String,
    #[serde(default = "epoch", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_to: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub metadata: PostMetadata,
}

impl Default for Post {
    fn default() -> Self {
        Self {
            id: None,
            username: None,
            created_by: None,
            message: String::new(),
            timestamp: epoch(),
            reply_to: None,
            metadata: PostMetadata::default(),
        }
    }
}

impl Post {
    /// Display name of the creator: `createdBy`, falling back to `username`.
    pub fn author(&self) -> Option<&str> {
        [self.created_by.as_deref(), self.username.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
    }

    /// Name that `@mentions` are matched against: `username`, falling back to `createdBy`.
    pub fn handle(&self) -> Option<&str> {
        [self.username.as_deref(), self.created_by.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.metadata.attachments
    }

    /// Eligible for display: has an id and either text or at least one attachment.
    pub fn is_valid(&self) -> bool {
        self.id.is_some() && (!self.message.trim().is_empty() || !self.attachments().is_empty())
    }

    pub fn reactions_for(&self, emoji: &str) -> &[String] {
        self.metadata
            .reactions
            .get(emoji)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Parses the timestamp shapes the backend has been seen to emit: RFC 3339 strings, naive
/// date-times, and epoch milliseconds (as a number or a numeric string).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(num) => num
            .as_i64()
            .or_else(|| num.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return Some(parsed.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                    return Some(naive.and_utc());
                }
            }
            raw.parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        }
        Value::Object(map) => map.get("$date").and_then(parse_timestamp),
        _ => None,
    }
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(mut map) => map.remove("$oid").and_then(id_from_value),
        _ => None,
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(id_from_value))
}

fn lenient_id_required<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_id(deserializer)?.unwrap_or_default())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_optional_timestamp(deserializer)?.unwrap_or_else(epoch))
}

fn lenient_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
