use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{notification::*, user::UserId},
    services::store::NotificationStore,
};

/// Read side of the notification feed. Every call is scoped to the caller.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    config: Config,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, config: &Config) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    /// 获取用户通知列表
    ///
    /// A `cursor` switches to keyset paging and takes precedence over `page`.
    pub async fn list(&self, user_id: UserId, query: ListQuery) -> Result<NotificationPage> {
        debug!("Listing notifications for user {}: {:?}", user_id, query);
        query.validate()?;

        let per_page = query
            .per_page
            .unwrap_or(self.config.default_notifications_per_page)
            .clamp(1, self.config.max_notifications_per_page.max(1));

        let cursor = query.cursor.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let (anchor, requested_page) = match cursor {
            Some(token) => {
                let cursor = Cursor::decode(token)
                    .ok_or_else(|| AppError::bad_request("Invalid pagination cursor"))?;
                (PageAnchor::After(cursor), None)
            }
            None => {
                let page = u64::from(query.page.unwrap_or(1).max(1));
                (PageAnchor::Offset((page - 1) * u64::from(per_page)), Some(page))
            }
        };

        let slice = self
            .store
            .list(user_id, PageRequest { per_page, anchor })
            .await?;

        let per_page_u64 = u64::from(per_page);
        let current_page = requested_page.unwrap_or(slice.skipped / per_page_u64 + 1);
        let last_page = ((slice.total + per_page_u64 - 1) / per_page_u64).max(1);
        let has_more = slice.skipped + (slice.items.len() as u64) < slice.total;
        let next_cursor = if has_more {
            slice.items.last().map(|n| n.cursor().encode())
        } else {
            None
        };

        Ok(NotificationPage {
            meta: PageMeta {
                current_page,
                last_page,
                per_page,
                total: slice.total,
                next_cursor,
            },
            data: slice.items,
        })
    }

    /// 获取未读通知
    pub async fn unread(&self, user_id: UserId, query: UnreadQuery) -> Result<Vec<Notification>> {
        query.validate()?;
        let limit = query.limit.unwrap_or(self.config.default_unread_limit).max(1);
        debug!("Fetching up to {} unread notifications for user {}", limit, user_id);
        self.store.unread(user_id, limit).await
    }

    /// 获取未读通知数量
    pub async fn unread_count(&self, user_id: UserId) -> Result<u64> {
        self.store.unread_count(user_id).await
    }

    /// 标记通知为已读
    ///
    /// Already-read rows come back unchanged. A row owned by someone else is
    /// indistinguishable from a missing one.
    pub async fn mark_read(&self, user_id: UserId, notification_id: Uuid) -> Result<Notification> {
        let notification = self
            .store
            .mark_read(user_id, notification_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::not_found("Notification"))?;

        debug!("Notification {} read by user {}", notification_id, user_id);
        Ok(notification)
    }

    /// 标记所有通知为已读
    pub async fn mark_all_read(&self, user_id: UserId) -> Result<u64> {
        let updated = self.store.mark_all_read(user_id, Utc::now()).await?;
        info!("Marked {} notification(s) read for user {}", updated, user_id);
        Ok(updated)
    }
}
