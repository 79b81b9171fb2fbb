use serde::{Deserialize, Serialize};

use super::{
    notification::NotificationType,
    user::{ActorSummary, UserId},
};

/// A post (clip) together with its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub id: i64,
    pub owner_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRef {
    pub id: i64,
    pub title: String,
}

/// A business action that may produce notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    UserFollowed {
        actor: ActorSummary,
        followed_id: UserId,
    },
    PostLiked {
        actor: ActorSummary,
        post: PostRef,
    },
    PostCommented {
        actor: ActorSummary,
        post: PostRef,
        comment_id: i64,
        excerpt: String,
    },
    ClipUploaded {
        actor: ActorSummary,
        clip: ClipRef,
    },
    PlayerTagged {
        actor: ActorSummary,
        player_id: UserId,
        clip: ClipRef,
    },
    MessageSent {
        actor: ActorSummary,
        receiver_id: UserId,
        message_id: i64,
        preview: String,
    },
}

impl Action {
    pub fn actor(&self) -> &ActorSummary {
        match self {
            Action::UserFollowed { actor, .. }
            | Action::PostLiked { actor, .. }
            | Action::PostCommented { actor, .. }
            | Action::ClipUploaded { actor, .. }
            | Action::PlayerTagged { actor, .. }
            | Action::MessageSent { actor, .. } => actor,
        }
    }

    /// Replace the actor, e.g. with the authenticated caller's own profile.
    pub fn with_actor(mut self, new_actor: ActorSummary) -> Self {
        match &mut self {
            Action::UserFollowed { actor, .. }
            | Action::PostLiked { actor, .. }
            | Action::PostCommented { actor, .. }
            | Action::ClipUploaded { actor, .. }
            | Action::PlayerTagged { actor, .. }
            | Action::MessageSent { actor, .. } => *actor = new_actor,
        }
        self
    }

    pub fn notification_type(&self) -> NotificationType {
        match self {
            Action::UserFollowed { .. } => NotificationType::UserFollowed,
            Action::PostLiked { .. } => NotificationType::PostLiked,
            Action::PostCommented { .. } => NotificationType::PostCommented,
            Action::ClipUploaded { .. } => NotificationType::NewClipUploaded,
            Action::PlayerTagged { .. } => NotificationType::PlayerTaggedClip,
            Action::MessageSent { .. } => NotificationType::MessageReceived,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_from_json() {
        let action: Action = serde_json::from_value(json!({
            "kind": "post_liked",
            "actor": {"id": 4, "name": "Dee", "photo": null},
            "post": {"id": 12, "owner_id": 3}
        }))
        .unwrap();

        assert_eq!(action.actor().id, UserId(4));
        assert_eq!(action.notification_type(), NotificationType::PostLiked);

        let action = action.with_actor(ActorSummary::new(4, "Dee Real"));
        assert_eq!(action.actor().name, "Dee Real");
        assert!(matches!(action, Action::PostLiked { post: PostRef { id: 12, .. }, .. }));
    }
}
