use std::{collections::HashSet, sync::Arc};
use tracing::debug;

use crate::{
    error::Result,
    models::{activity::Action, user::UserId},
    services::store::FollowStore,
};

/// Maps an action to the users who should hear about it.
#[derive(Clone)]
pub struct RecipientResolver {
    follows: Arc<dyn FollowStore>,
}

impl RecipientResolver {
    pub fn new(follows: Arc<dyn FollowStore>) -> Self {
        Self { follows }
    }

    /// Distinct recipients in first-seen order, never including the actor.
    pub async fn resolve(&self, action: &Action) -> Result<Vec<UserId>> {
        let candidates = match action {
            Action::UserFollowed { followed_id, .. } => vec![*followed_id],
            Action::PostLiked { post, .. } | Action::PostCommented { post, .. } => {
                vec![post.owner_id]
            }
            Action::ClipUploaded { actor, .. } => self.follows.followers_of(actor.id).await?,
            Action::PlayerTagged { player_id, .. } => self.follows.followers_of(*player_id).await?,
            Action::MessageSent { receiver_id, .. } => vec![*receiver_id],
        };

        let actor_id = action.actor().id;
        let mut seen = HashSet::with_capacity(candidates.len());
        let recipients: Vec<UserId> = candidates
            .into_iter()
            .filter(|id| *id != actor_id)
            .filter(|id| seen.insert(*id))
            .collect();

        debug!(
            "Resolved {} recipient(s) for {} by user {}",
            recipients.len(),
            action.notification_type(),
            actor_id
        );
        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            activity::{ClipRef, PostRef},
            user::ActorSummary,
        },
        services::store::MockFollowStore,
    };
    use mockall::predicate::eq;

    fn actor(id: i64) -> ActorSummary {
        ActorSummary::new(id, format!("user{}", id))
    }

    fn resolver_with_followers(of: i64, followers: Vec<i64>) -> RecipientResolver {
        let mut follows = MockFollowStore::new();
        follows
            .expect_followers_of()
            .with(eq(UserId(of)))
            .returning(move |_| Ok(followers.iter().copied().map(UserId).collect()));
        RecipientResolver::new(Arc::new(follows))
    }

    #[tokio::test]
    async fn test_like_on_own_post_has_no_recipients() {
        let resolver = RecipientResolver::new(Arc::new(MockFollowStore::new()));
        let action = Action::PostLiked {
            actor: actor(1),
            post: PostRef { id: 10, owner_id: UserId(1) },
        };
        assert!(resolver.resolve(&action).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_comment_notifies_owner() {
        let resolver = RecipientResolver::new(Arc::new(MockFollowStore::new()));
        let action = Action::PostCommented {
            actor: actor(4),
            post: PostRef { id: 10, owner_id: UserId(3) },
            comment_id: 5,
            excerpt: "nice".to_string(),
        };
        assert_eq!(resolver.resolve(&action).await.unwrap(), vec![UserId(3)]);
    }

    #[tokio::test]
    async fn test_clip_upload_fans_out_to_distinct_followers() {
        let resolver = resolver_with_followers(7, vec![2, 3, 2, 7, 5, 3]);
        let action = Action::ClipUploaded {
            actor: actor(7),
            clip: ClipRef { id: 1, title: "Poster dunk".to_string() },
        };
        assert_eq!(
            resolver.resolve(&action).await.unwrap(),
            vec![UserId(2), UserId(3), UserId(5)]
        );
    }

    #[tokio::test]
    async fn test_player_tag_uses_player_followers_minus_actor() {
        let resolver = resolver_with_followers(9, vec![1, 4]);
        let action = Action::PlayerTagged {
            actor: actor(4),
            player_id: UserId(9),
            clip: ClipRef { id: 2, title: "Crossover".to_string() },
        };
        assert_eq!(resolver.resolve(&action).await.unwrap(), vec![UserId(1)]);
    }

    #[tokio::test]
    async fn test_message_to_self_is_dropped() {
        let resolver = RecipientResolver::new(Arc::new(MockFollowStore::new()));
        let action = Action::MessageSent {
            actor: actor(6),
            receiver_id: UserId(6),
            message_id: 1,
            preview: "note to self".to_string(),
        };
        assert!(resolver.resolve(&action).await.unwrap().is_empty());
    }
}
