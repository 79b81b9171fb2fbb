use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::user::{ActorSummary, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PostLiked,
    PostCommented,
    UserFollowed,
    MessageReceived,
    PlayerTaggedClip,
    NewClipUploaded,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::PostLiked => "post_liked",
            NotificationType::PostCommented => "post_commented",
            NotificationType::UserFollowed => "user_followed",
            NotificationType::MessageReceived => "message_received",
            NotificationType::PlayerTaggedClip => "player_tagged_clip",
            NotificationType::NewClipUploaded => "new_clip_uploaded",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostLikedData {
    pub actor: ActorSummary,
    pub post_id: i64,
    pub message: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostCommentedData {
    pub actor: ActorSummary,
    pub post_id: i64,
    pub comment_id: i64,
    pub excerpt: String,
    pub message: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFollowedData {
    pub actor: ActorSummary,
    pub message: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceivedData {
    pub actor: ActorSummary,
    pub message_id: i64,
    pub preview: String,
    pub message: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerTaggedClipData {
    pub actor: ActorSummary,
    pub player_id: UserId,
    pub clip_id: i64,
    pub message: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewClipUploadedData {
    pub actor: ActorSummary,
    pub clip_id: i64,
    pub title: String,
    pub message: String,
    pub url: Option<String>,
}

/// Typed notification body. Serializes as `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NotificationPayload {
    PostLiked(PostLikedData),
    PostCommented(PostCommentedData),
    UserFollowed(UserFollowedData),
    MessageReceived(MessageReceivedData),
    PlayerTaggedClip(PlayerTaggedClipData),
    NewClipUploaded(NewClipUploadedData),
}

impl NotificationPayload {
    pub fn kind(&self) -> NotificationType {
        match self {
            NotificationPayload::PostLiked(_) => NotificationType::PostLiked,
            NotificationPayload::PostCommented(_) => NotificationType::PostCommented,
            NotificationPayload::UserFollowed(_) => NotificationType::UserFollowed,
            NotificationPayload::MessageReceived(_) => NotificationType::MessageReceived,
            NotificationPayload::PlayerTaggedClip(_) => NotificationType::PlayerTaggedClip,
            NotificationPayload::NewClipUploaded(_) => NotificationType::NewClipUploaded,
        }
    }

    pub fn actor(&self) -> &ActorSummary {
        match self {
            NotificationPayload::PostLiked(d) => &d.actor,
            NotificationPayload::PostCommented(d) => &d.actor,
            NotificationPayload::UserFollowed(d) => &d.actor,
            NotificationPayload::MessageReceived(d) => &d.actor,
            NotificationPayload::PlayerTaggedClip(d) => &d.actor,
            NotificationPayload::NewClipUploaded(d) => &d.actor,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            NotificationPayload::PostLiked(d) => &d.message,
            NotificationPayload::PostCommented(d) => &d.message,
            NotificationPayload::UserFollowed(d) => &d.message,
            NotificationPayload::MessageReceived(d) => &d.message,
            NotificationPayload::PlayerTaggedClip(d) => &d.message,
            NotificationPayload::NewClipUploaded(d) => &d.message,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            NotificationPayload::PostLiked(d) => d.url.as_deref(),
            NotificationPayload::PostCommented(d) => d.url.as_deref(),
            NotificationPayload::UserFollowed(d) => d.url.as_deref(),
            NotificationPayload::MessageReceived(d) => d.url.as_deref(),
            NotificationPayload::PlayerTaggedClip(d) => d.url.as_deref(),
            NotificationPayload::NewClipUploaded(d) => d.url.as_deref(),
        }
    }

    /// The `data` half of the wire shape.
    pub fn data_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        Ok(value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Rebuild a payload from a stored `type` column and `data` document.
    pub fn from_parts(
        kind: NotificationType,
        data: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "type": kind,
            "data": data,
        }))
    }
}

/// Durable notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: UserId,
    #[serde(flatten)]
    pub payload: NotificationPayload,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(recipient_id: UserId, payload: NotificationPayload, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id,
            payload,
            read_at: None,
            created_at,
        }
    }

    pub fn kind(&self) -> NotificationType {
        self.payload.kind()
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Sets `read_at` once. Returns false when it was already set.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.read_at.is_some() {
            return false;
        }
        self.read_at = Some(at);
        true
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id,
        }
    }

    /// Descending listing order: newest first, id breaks ties.
    pub fn listing_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

/// Keyset position on `(created_at, id)`; items strictly older are returned next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}|{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.id
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
        let raw = String::from_utf8(bytes).ok()?;
        let (created_at, id) = raw.split_once('|')?;
        Some(Self {
            created_at: DateTime::parse_from_rfc3339(created_at)
                .ok()?
                .with_timezone(&Utc),
            id: Uuid::parse_str(id).ok()?,
        })
    }

    /// True when `key` sorts after this cursor in descending listing order.
    pub fn precedes(&self, key: (DateTime<Utc>, Uuid)) -> bool {
        key < (self.created_at, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAnchor {
    Offset(u64),
    After(Cursor),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub per_page: u32,
    pub anchor: PageAnchor,
}

/// Raw page as returned by a store.
#[derive(Debug, Clone, Default)]
pub struct NotificationSlice {
    pub items: Vec<Notification>,
    pub total: u64,
    /// Rows of the same recipient that sort before this page.
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageMeta {
    pub current_page: u64,
    pub last_page: u64,
    pub per_page: u32,
    pub total: u64,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPage {
    pub data: Vec<Notification>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ListQuery {
    #[validate(range(min = 1, max = 100))]
    pub per_page: Option<u32>,
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UnreadQuery {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn liked() -> NotificationPayload {
        NotificationPayload::PostLiked(PostLikedData {
            actor: ActorSummary::new(4, "Dee"),
            post_id: 31,
            message: "Dee liked your clip".to_string(),
            url: Some("/clips/31".to_string()),
        })
    }

    #[test]
    fn test_wire_shape_is_flat() {
        let notification = Notification::new(UserId(3), liked(), Utc::now());
        let value = serde_json::to_value(&notification).unwrap();

        assert_eq!(value["type"], json!("post_liked"));
        assert_eq!(value["data"]["post_id"], json!(31));
        assert_eq!(value["data"]["actor"]["id"], json!(4));
        assert_eq!(value["read_at"], json!(null));
        assert_eq!(value["recipient_id"], json!(3));

        let back: Notification = serde_json::from_value(value).unwrap();
        assert_eq!(back, notification);
    }

    #[test]
    fn test_payload_from_parts() {
        let payload = liked();
        let data = payload.data_value().unwrap();
        let rebuilt = NotificationPayload::from_parts(NotificationType::PostLiked, data).unwrap();
        assert_eq!(rebuilt, payload);

        let mismatched = NotificationPayload::from_parts(
            NotificationType::PostCommented,
            liked().data_value().unwrap(),
        );
        assert!(mismatched.is_err());
    }

    #[test]
    fn test_mark_read_only_once() {
        let mut notification = Notification::new(UserId(3), liked(), Utc::now());
        let first = Utc::now();
        assert!(notification.mark_read(first));
        assert!(!notification.mark_read(first + chrono::Duration::seconds(5)));
        assert_eq!(notification.read_at, Some(first));
    }

    #[test]
    fn test_cursor_token() {
        let notification = Notification::new(
            UserId(1),
            liked(),
            DateTime::parse_from_rfc3339("2024-03-01T10:00:00.123456Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let cursor = notification.cursor();
        assert_eq!(Cursor::decode(&cursor.encode()), Some(cursor));
        assert_eq!(Cursor::decode("not-a-cursor"), None);
        assert!(!cursor.precedes(notification.listing_key()));
    }
}
