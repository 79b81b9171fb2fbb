use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    cmp::Reverse,
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{FollowStore, NotificationStore};
use crate::{
    error::Result,
    models::{
        follow::Follow,
        notification::{Notification, NotificationSlice, PageAnchor, PageRequest},
        user::UserId,
    },
};

/// In-process notification table.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotificationStore {
    rows: Arc<RwLock<Vec<Notification>>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored row regardless of owner, oldest first.
    pub async fn snapshot(&self) -> Vec<Notification> {
        self.rows.read().await.clone()
    }

    fn owned_newest_first(rows: &[Notification], recipient: UserId) -> Vec<Notification> {
        let mut owned: Vec<Notification> = rows
            .iter()
            .filter(|n| n.recipient_id == recipient)
            .cloned()
            .collect();
        owned.sort_by_key(|n| Reverse(n.listing_key()));
        owned
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<()> {
        self.rows.write().await.push(notification);
        Ok(())
    }

    async fn find(&self, recipient: UserId, id: Uuid) -> Result<Option<Notification>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|n| n.id == id && n.recipient_id == recipient)
            .cloned())
    }

    async fn list(&self, recipient: UserId, page: PageRequest) -> Result<NotificationSlice> {
        let owned = {
            let rows = self.rows.read().await;
            Self::owned_newest_first(&rows, recipient)
        };
        let total = owned.len() as u64;

        let skipped = match page.anchor {
            PageAnchor::Offset(offset) => offset.min(total) as usize,
            PageAnchor::After(cursor) => owned
                .iter()
                .take_while(|n| !cursor.precedes(n.listing_key()))
                .count(),
        };

        let items = owned
            .into_iter()
            .skip(skipped)
            .take(page.per_page as usize)
            .collect();

        Ok(NotificationSlice {
            items,
            total,
            skipped: skipped as u64,
        })
    }

    async fn unread(&self, recipient: UserId, limit: u32) -> Result<Vec<Notification>> {
        let rows = self.rows.read().await;
        Ok(Self::owned_newest_first(&rows, recipient)
            .into_iter()
            .filter(|n| !n.is_read())
            .take(limit as usize)
            .collect())
    }

    async fn unread_count(&self, recipient: UserId) -> Result<u64> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|n| n.recipient_id == recipient && !n.is_read())
            .count() as u64)
    }

    async fn mark_read(
        &self,
        recipient: UserId,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let mut rows = self.rows.write().await;
        Ok(rows
            .iter_mut()
            .find(|n| n.id == id && n.recipient_id == recipient)
            .map(|n| {
                n.mark_read(at);
                n.clone()
            }))
    }

    async fn mark_all_read(&self, recipient: UserId, at: DateTime<Utc>) -> Result<u64> {
        // 单次写锁内完成，与并发插入串行化
        let mut rows = self.rows.write().await;
        let updated = rows
            .iter_mut()
            .filter(|n| n.recipient_id == recipient)
            .map(|n| n.mark_read(at))
            .filter(|changed| *changed)
            .count();
        Ok(updated as u64)
    }
}

/// In-process follow graph keyed by the followed user.
#[derive(Debug, Clone, Default)]
pub struct MemoryFollowStore {
    edges: Arc<RwLock<HashMap<UserId, Vec<Follow>>>>,
}

impl MemoryFollowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FollowStore for MemoryFollowStore {
    async fn insert_if_absent(&self, follower: UserId, following: UserId) -> Result<bool> {
        let mut edges = self.edges.write().await;
        let followers = edges.entry(following).or_default();
        if followers.iter().any(|f| f.follower_id == follower) {
            return Ok(false);
        }
        followers.push(Follow {
            follower_id: follower,
            following_id: following,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn remove(&self, follower: UserId, following: UserId) -> Result<bool> {
        let mut edges = self.edges.write().await;
        let Some(followers) = edges.get_mut(&following) else {
            return Ok(false);
        };
        let before = followers.len();
        followers.retain(|f| f.follower_id != follower);
        Ok(followers.len() != before)
    }

    async fn followers_of(&self, user: UserId) -> Result<Vec<UserId>> {
        let edges = self.edges.read().await;
        let ids: BTreeSet<UserId> = edges
            .get(&user)
            .map(|followers| followers.iter().map(|f| f.follower_id).collect())
            .unwrap_or_default();
        Ok(ids.into_iter().collect())
    }

    async fn is_following(&self, follower: UserId, following: UserId) -> Result<bool> {
        let edges = self.edges.read().await;
        Ok(edges
            .get(&following)
            .map(|followers| followers.iter().any(|f| f.follower_id == follower))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        notification::{NotificationPayload, UserFollowedData},
        user::ActorSummary,
    };
    use chrono::Duration;
    use proptest::prelude::*;

    fn followed(recipient: i64, at: DateTime<Utc>) -> Notification {
        Notification::new(
            UserId(recipient),
            NotificationPayload::UserFollowed(UserFollowedData {
                actor: ActorSummary::new(1, "Ari"),
                message: "Ari started following you".to_string(),
                url: None,
            }),
            at,
        )
    }

    #[tokio::test]
    async fn test_keyset_pages_do_not_overlap_under_inserts() {
        let store = MemoryNotificationStore::new();
        let base = Utc::now();
        for i in 0..5 {
            store.insert(followed(2, base + Duration::seconds(i))).await.unwrap();
        }

        let first = store
            .list(UserId(2), PageRequest { per_page: 2, anchor: PageAnchor::Offset(0) })
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);

        // a newer row lands between page fetches
        store.insert(followed(2, base + Duration::seconds(60))).await.unwrap();

        let cursor = first.items.last().unwrap().cursor();
        let second = store
            .list(UserId(2), PageRequest { per_page: 2, anchor: PageAnchor::After(cursor) })
            .await
            .unwrap();

        assert_eq!(second.items.len(), 2);
        assert_eq!(second.total, 6);
        assert_eq!(second.skipped, 3);
        for item in &second.items {
            assert!(first.items.iter().all(|seen| seen.id != item.id));
            assert!(item.created_at < cursor.created_at);
        }
    }

    #[tokio::test]
    async fn test_mark_all_read_only_touches_owner() {
        let store = MemoryNotificationStore::new();
        let now = Utc::now();
        store.insert(followed(2, now)).await.unwrap();
        store.insert(followed(2, now + Duration::seconds(1))).await.unwrap();
        store.insert(followed(5, now)).await.unwrap();

        assert_eq!(store.mark_all_read(UserId(2), now).await.unwrap(), 2);
        assert_eq!(store.mark_all_read(UserId(2), now).await.unwrap(), 0);
        assert_eq!(store.unread_count(UserId(2)).await.unwrap(), 0);
        assert_eq!(store.unread_count(UserId(5)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_follow_edges_are_unique() {
        let store = MemoryFollowStore::new();
        assert!(store.insert_if_absent(UserId(1), UserId(2)).await.unwrap());
        assert!(!store.insert_if_absent(UserId(1), UserId(2)).await.unwrap());
        assert!(store.insert_if_absent(UserId(3), UserId(2)).await.unwrap());

        assert_eq!(store.followers_of(UserId(2)).await.unwrap(), vec![UserId(1), UserId(3)]);
        assert!(store.remove(UserId(1), UserId(2)).await.unwrap());
        assert!(!store.remove(UserId(1), UserId(2)).await.unwrap());
        assert!(!store.is_following(UserId(1), UserId(2)).await.unwrap());
    }

    proptest! {
        #[test]
        fn prop_pages_stay_with_owner_and_newest_first(
            rows in prop::collection::vec((1i64..=5, 0i64..30), 0..60),
            per_page in 1u32..8,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let store = MemoryNotificationStore::new();
                let base = Utc::now();
                for (recipient, offset) in &rows {
                    store
                        .insert(followed(*recipient, base + Duration::seconds(*offset)))
                        .await
                        .unwrap();
                }

                for user in 1..=5 {
                    let mut seen: Vec<Notification> = Vec::new();
                    let mut anchor = PageAnchor::Offset(0);
                    loop {
                        let page = store
                            .list(UserId(user), PageRequest { per_page, anchor })
                            .await
                            .unwrap();
                        let Some(last) = page.items.last() else { break };
                        anchor = PageAnchor::After(last.cursor());
                        seen.extend(page.items);
                    }

                    let expected = rows.iter().filter(|(r, _)| *r == user).count();
                    assert_eq!(seen.len(), expected);
                    assert!(seen.iter().all(|n| n.recipient_id == UserId(user)));
                    assert!(seen.windows(2).all(|w| w[0].created_at >= w[1].created_at));
                    let distinct: BTreeSet<Uuid> = seen.iter().map(|n| n.id).collect();
                    assert_eq!(distinct.len(), seen.len());
                }
            });
        }
    }
}
