use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{FollowStore, NotificationStore};
use crate::{
    error::{AppError, Result},
    models::{
        notification::{
            Notification, NotificationPayload, NotificationSlice, NotificationType, PageAnchor,
            PageRequest,
        },
        user::UserId,
    },
    services::Database,
};

const NOTIFICATION_FIELDS: &str =
    "meta::id(id) AS id, recipient_id, kind, data, read_at, created_at, created_ts";

const UNREAD: &str = "(read_at IS NONE OR read_at IS NULL)";

#[derive(Debug, Deserialize)]
struct NotificationRow {
    id: String,
    recipient_id: UserId,
    kind: NotificationType,
    data: Value,
    #[serde(default)]
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| AppError::persistence(format!("corrupt notification id {}: {}", row.id, e)))?,
            recipient_id: row.recipient_id,
            payload: NotificationPayload::from_parts(row.kind, row.data)?,
            read_at: row.read_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

fn rows_into_notifications(rows: Vec<NotificationRow>) -> Result<Vec<Notification>> {
    rows.into_iter().map(Notification::try_from).collect()
}

fn count_of(row: Option<CountRow>) -> u64 {
    row.map(|r| r.count).unwrap_or(0)
}

/// Notification table in SurrealDB. Rows are keyed `notification:<uuid>`.
#[derive(Clone)]
pub struct SurrealNotificationStore {
    db: Arc<Database>,
}

impl SurrealNotificationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationStore for SurrealNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<()> {
        let content = json!({
            "recipient_id": notification.recipient_id,
            "kind": notification.kind(),
            "data": notification.payload.data_value()?,
            "read_at": notification.read_at,
            "created_at": notification.created_at,
            "created_ts": notification.created_at.timestamp_micros(),
        });

        self.db
            .query_with_params(
                "CREATE type::thing('notification', $id) CONTENT $content RETURN NONE",
                json!({
                    "id": notification.id.to_string(),
                    "content": content,
                }),
            )
            .await?;

        debug!("Stored notification {} for user {}", notification.id, notification.recipient_id);
        Ok(())
    }

    async fn find(&self, recipient: UserId, id: Uuid) -> Result<Option<Notification>> {
        let query = format!(
            "SELECT {} FROM type::thing('notification', $id) WHERE recipient_id = $recipient",
            NOTIFICATION_FIELDS
        );
        let mut response = self
            .db
            .query_with_params(&query, json!({ "id": id.to_string(), "recipient": recipient }))
            .await?;
        let rows: Vec<NotificationRow> = response.take(0)?;
        Ok(rows_into_notifications(rows)?.into_iter().next())
    }

    async fn list(&self, recipient: UserId, page: PageRequest) -> Result<NotificationSlice> {
        let total_query =
            "SELECT count() AS count FROM notification WHERE recipient_id = $recipient GROUP ALL;";

        let (query, params) = match page.anchor {
            PageAnchor::Offset(offset) => (
                format!(
                    r#"
                    {total_query}
                    SELECT {fields} FROM notification
                    WHERE recipient_id = $recipient
                    ORDER BY created_ts DESC, id DESC
                    LIMIT $limit START $offset;
                    "#,
                    total_query = total_query,
                    fields = NOTIFICATION_FIELDS,
                ),
                json!({
                    "recipient": recipient,
                    "limit": page.per_page,
                    "offset": offset,
                }),
            ),
            PageAnchor::After(cursor) => (
                format!(
                    r#"
                    {total_query}
                    SELECT count() AS count FROM notification
                    WHERE recipient_id = $recipient
                    AND (created_ts > $ts OR (created_ts = $ts AND meta::id(id) >= $cursor_id))
                    GROUP ALL;
                    SELECT {fields} FROM notification
                    WHERE recipient_id = $recipient
                    AND (created_ts < $ts OR (created_ts = $ts AND meta::id(id) < $cursor_id))
                    ORDER BY created_ts DESC, id DESC
                    LIMIT $limit;
                    "#,
                    total_query = total_query,
                    fields = NOTIFICATION_FIELDS,
                ),
                json!({
                    "recipient": recipient,
                    "limit": page.per_page,
                    "ts": cursor.created_at.timestamp_micros(),
                    "cursor_id": cursor.id.to_string(),
                }),
            ),
        };

        let mut response = self.db.query_with_params(&query, params).await?;
        let total = count_of(response.take::<Option<CountRow>>(0)?);

        let (skipped, rows) = match page.anchor {
            PageAnchor::Offset(offset) => {
                let rows: Vec<NotificationRow> = response.take(1)?;
                (offset.min(total), rows)
            }
            PageAnchor::After(_) => {
                let skipped = count_of(response.take::<Option<CountRow>>(1)?);
                let rows: Vec<NotificationRow> = response.take(2)?;
                (skipped, rows)
            }
        };

        Ok(NotificationSlice {
            items: rows_into_notifications(rows)?,
            total,
            skipped,
        })
    }

    async fn unread(&self, recipient: UserId, limit: u32) -> Result<Vec<Notification>> {
        let query = format!(
            r#"
            SELECT {} FROM notification
            WHERE recipient_id = $recipient AND {}
            ORDER BY created_ts DESC, id DESC
            LIMIT $limit
            "#,
            NOTIFICATION_FIELDS, UNREAD
        );
        let mut response = self
            .db
            .query_with_params(&query, json!({ "recipient": recipient, "limit": limit }))
            .await?;
        let rows: Vec<NotificationRow> = response.take(0)?;
        rows_into_notifications(rows)
    }

    async fn unread_count(&self, recipient: UserId) -> Result<u64> {
        let query = format!(
            "SELECT count() AS count FROM notification WHERE recipient_id = $recipient AND {} GROUP ALL",
            UNREAD
        );
        let mut response = self
            .db
            .query_with_params(&query, json!({ "recipient": recipient }))
            .await?;
        Ok(count_of(response.take::<Option<CountRow>>(0)?))
    }

    async fn mark_read(
        &self,
        recipient: UserId,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        // 表级 UPDATE + WHERE，记录不存在时不会被创建
        let query = format!(
            r#"
            UPDATE notification SET read_at = $at
            WHERE id = type::thing('notification', $id)
            AND recipient_id = $recipient
            AND {unread}
            RETURN NONE;
            SELECT {fields} FROM type::thing('notification', $id) WHERE recipient_id = $recipient;
            "#,
            unread = UNREAD,
            fields = NOTIFICATION_FIELDS,
        );
        let mut response = self
            .db
            .query_with_params(
                &query,
                json!({ "id": id.to_string(), "recipient": recipient, "at": at }),
            )
            .await?;
        let rows: Vec<NotificationRow> = response.take(1)?;
        Ok(rows_into_notifications(rows)?.into_iter().next())
    }

    async fn mark_all_read(&self, recipient: UserId, at: DateTime<Utc>) -> Result<u64> {
        let query = format!(
            "UPDATE notification SET read_at = $at WHERE recipient_id = $recipient AND {} RETURN id",
            UNREAD
        );
        let mut response = self
            .db
            .query_with_params(&query, json!({ "recipient": recipient, "at": at }))
            .await?;
        let updated: Vec<Value> = response.take(0)?;
        Ok(updated.len() as u64)
    }
}

#[derive(Debug, Deserialize)]
struct FollowerRow {
    follower_id: UserId,
}

/// Follow edges in SurrealDB, keyed `follow:<follower>_<following>`.
#[derive(Clone)]
pub struct SurrealFollowStore {
    db: Arc<Database>,
}

impl SurrealFollowStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn is_duplicate_edge(err: &AppError) -> bool {
    match err {
        AppError::Persistence(msg) => {
            msg.contains("already exists") || msg.contains("already contains")
        }
        _ => false,
    }
}

#[async_trait]
impl FollowStore for SurrealFollowStore {
    async fn insert_if_absent(&self, follower: UserId, following: UserId) -> Result<bool> {
        if self.is_following(follower, following).await? {
            return Ok(false);
        }

        let created = self
            .db
            .query_with_params(
                "CREATE type::thing('follow', $key) CONTENT $content RETURN NONE",
                json!({
                    "key": format!("{}_{}", follower, following),
                    "content": {
                        "follower_id": follower,
                        "following_id": following,
                        "created_at": Utc::now(),
                    },
                }),
            )
            .await;

        match created {
            Ok(_) => Ok(true),
            // 并发关注时唯一索引兜底
            Err(e) if is_duplicate_edge(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, follower: UserId, following: UserId) -> Result<bool> {
        let mut response = self
            .db
            .query_with_params(
                r#"
                DELETE follow
                WHERE follower_id = $follower
                AND following_id = $following
                RETURN BEFORE
                "#,
                json!({ "follower": follower, "following": following }),
            )
            .await?;
        let removed: Vec<Value> = response.take(0)?;
        Ok(!removed.is_empty())
    }

    async fn followers_of(&self, user: UserId) -> Result<Vec<UserId>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT follower_id FROM follow WHERE following_id = $user ORDER BY follower_id",
                json!({ "user": user }),
            )
            .await?;
        let rows: Vec<FollowerRow> = response.take(0)?;
        Ok(rows.into_iter().map(|r| r.follower_id).collect())
    }

    async fn is_following(&self, follower: UserId, following: UserId) -> Result<bool> {
        let mut response = self
            .db
            .query_with_params(
                r#"
                SELECT count() AS count FROM follow
                WHERE follower_id = $follower
                AND following_id = $following
                GROUP ALL
                "#,
                json!({ "follower": follower, "following": following }),
            )
            .await?;
        Ok(count_of(response.take::<Option<CountRow>>(0)?) > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion() {
        let row: NotificationRow = serde_json::from_value(json!({
            "id": "6f1c2d1e-8a5b-4b8e-9a55-3f2a3c4d5e6f",
            "recipient_id": 3,
            "kind": "post_commented",
            "data": {
                "actor": {"id": 4, "name": "Dee", "photo": null},
                "post_id": 12,
                "comment_id": 77,
                "excerpt": "cold from deep",
                "message": "Dee commented on your clip",
                "url": "/clips/12"
            },
            "read_at": null,
            "created_at": "2024-03-01T10:00:00.000001Z",
            "created_ts": 1709287200000001i64
        }))
        .unwrap();

        let notification = Notification::try_from(row).unwrap();
        assert_eq!(notification.recipient_id, UserId(3));
        assert_eq!(notification.kind(), NotificationType::PostCommented);
        assert!(!notification.is_read());
    }

    #[test]
    fn test_duplicate_edge_detection() {
        assert!(is_duplicate_edge(&AppError::persistence(
            "Database index `follow_pair` already contains [1, 2]"
        )));
        assert!(!is_duplicate_edge(&AppError::persistence("connection refused")));
        assert!(!is_duplicate_edge(&AppError::not_found("Follow")));
    }
}
