//! Persistence seams for notifications and the follow graph.
//!
//! Action handlers and the read-side service only see these traits; the
//! concrete backend is chosen at startup from `STORE_BACKEND`.

pub mod memory;
pub mod surreal;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        notification::{Notification, NotificationSlice, PageRequest},
        user::UserId,
    },
};

pub use memory::{MemoryFollowStore, MemoryNotificationStore};
pub use surreal::{SurrealFollowStore, SurrealNotificationStore};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist one new row.
    async fn insert(&self, notification: Notification) -> Result<()>;

    /// Fetch a row only if it belongs to `recipient`.
    async fn find(&self, recipient: UserId, id: Uuid) -> Result<Option<Notification>>;

    /// Newest-first page of the recipient's rows.
    async fn list(&self, recipient: UserId, page: PageRequest) -> Result<NotificationSlice>;

    async fn unread(&self, recipient: UserId, limit: u32) -> Result<Vec<Notification>>;

    async fn unread_count(&self, recipient: UserId) -> Result<u64>;

    /// Set `read_at` if it is still null. Returns the row as stored afterwards,
    /// or `None` when no row with that id belongs to `recipient`.
    async fn mark_read(
        &self,
        recipient: UserId,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Notification>>;

    /// Mark every unread row of `recipient` in one bulk operation.
    async fn mark_all_read(&self, recipient: UserId, at: DateTime<Utc>) -> Result<u64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FollowStore: Send + Sync {
    /// Returns true only when the edge did not exist before.
    async fn insert_if_absent(&self, follower: UserId, following: UserId) -> Result<bool>;

    async fn remove(&self, follower: UserId, following: UserId) -> Result<bool>;

    async fn followers_of(&self, user: UserId) -> Result<Vec<UserId>>;

    async fn is_following(&self, follower: UserId, following: UserId) -> Result<bool>;
}
