use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    error::{AppError, Result},
    models::{
        follow::{FollowOutcome, UnfollowOutcome},
        user::{ActorSummary, UserId},
    },
    services::{realtime::NotificationDispatcher, store::FollowStore},
};

#[derive(Clone)]
pub struct FollowService {
    follows: Arc<dyn FollowStore>,
    dispatcher: NotificationDispatcher,
}

impl FollowService {
    pub fn new(follows: Arc<dyn FollowStore>, dispatcher: NotificationDispatcher) -> Self {
        Self {
            follows,
            dispatcher,
        }
    }

    /// Creates the edge and notifies the followed user, but only on the
    /// transition from not-following to following.
    pub async fn follow(&self, follower: ActorSummary, following_id: UserId) -> Result<FollowOutcome> {
        debug!("User {} following user {}", follower.id, following_id);

        // 防止自己关注自己
        if follower.id == following_id {
            return Err(AppError::bad_request("Cannot follow yourself"));
        }

        if !self.follows.insert_if_absent(follower.id, following_id).await? {
            debug!("User {} already follows user {}", follower.id, following_id);
            return Ok(FollowOutcome::AlreadyFollowing);
        }

        info!("User {} followed user {}", follower.id, following_id);
        self.dispatcher.user_followed(follower, following_id).await;
        Ok(FollowOutcome::Followed)
    }

    /// Removes the edge. Notifications already sent stay where they are.
    pub async fn unfollow(&self, follower_id: UserId, following_id: UserId) -> Result<UnfollowOutcome> {
        debug!("User {} unfollowing user {}", follower_id, following_id);

        if self.follows.remove(follower_id, following_id).await? {
            info!("User {} unfollowed user {}", follower_id, following_id);
            Ok(UnfollowOutcome::Unfollowed)
        } else {
            Ok(UnfollowOutcome::NotFollowing)
        }
    }

    pub async fn followers(&self, user_id: UserId) -> Result<Vec<UserId>> {
        self.follows.followers_of(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        models::notification::NotificationType,
        services::{
            recipients::RecipientResolver,
            store::{MemoryFollowStore, MemoryNotificationStore},
            websocket::MockBroadcaster,
        },
    };

    fn service() -> (FollowService, MemoryNotificationStore) {
        let follows: Arc<dyn FollowStore> = Arc::new(MemoryFollowStore::new());
        let notifications = MemoryNotificationStore::new();

        let mut broadcaster = MockBroadcaster::new();
        broadcaster.expect_push().returning(|_| Ok(()));

        let dispatcher = NotificationDispatcher::new(
            RecipientResolver::new(follows.clone()),
            Arc::new(notifications.clone()),
            Arc::new(broadcaster),
            &Config::default(),
        );
        (FollowService::new(follows, dispatcher), notifications)
    }

    #[tokio::test]
    async fn test_first_follow_notifies_once() {
        let (service, notifications) = service();
        let alice = ActorSummary::new(1, "Alice");

        assert_eq!(
            service.follow(alice.clone(), UserId(2)).await.unwrap(),
            FollowOutcome::Followed
        );
        assert_eq!(
            service.follow(alice, UserId(2)).await.unwrap(),
            FollowOutcome::AlreadyFollowing
        );

        let rows = notifications.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipient_id, UserId(2));
        assert_eq!(rows[0].kind(), NotificationType::UserFollowed);
        assert!(rows[0].read_at.is_none());
    }

    #[tokio::test]
    async fn test_self_follow_is_rejected() {
        let (service, notifications) = service();
        let result = service.follow(ActorSummary::new(5, "Solo"), UserId(5)).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(notifications.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_unfollow_keeps_notifications() {
        let (service, notifications) = service();
        service.follow(ActorSummary::new(1, "Alice"), UserId(2)).await.unwrap();

        assert_eq!(
            service.unfollow(UserId(1), UserId(2)).await.unwrap(),
            UnfollowOutcome::Unfollowed
        );
        assert_eq!(
            service.unfollow(UserId(1), UserId(2)).await.unwrap(),
            UnfollowOutcome::NotFollowing
        );
        assert!(service.followers(UserId(2)).await.unwrap().is_empty());
        assert_eq!(notifications.snapshot().await.len(), 1);
    }
}
