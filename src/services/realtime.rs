use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    error::Result,
    models::{
        activity::{Action, ClipRef, PostRef},
        notification::*,
        user::{ActorSummary, UserId},
        websocket::BroadcastEnvelope,
    },
    services::{recipients::RecipientResolver, store::NotificationStore, websocket::Broadcaster},
};

/// Outcome of one fan-out, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FanoutReport {
    pub recipients: Vec<UserId>,
    pub persisted: Vec<Uuid>,
    pub persistence_failures: usize,
    pub broadcast_failures: usize,
}

impl FanoutReport {
    pub fn is_clean(&self) -> bool {
        self.persistence_failures == 0 && self.broadcast_failures == 0
    }
}

/// Strictly increasing timestamps at microsecond precision, so rows written by
/// one fan-out never tie on `created_at`.
#[derive(Debug)]
struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let mut last = self.last.lock();
        let next = match *last {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }
}

/// 实时通知集成服务
/// Writes one durable row per recipient and pushes the same event to the
/// recipient's private channel.
#[derive(Clone)]
pub struct NotificationDispatcher {
    resolver: RecipientResolver,
    store: Arc<dyn NotificationStore>,
    broadcaster: Arc<dyn Broadcaster>,
    config: Config,
    clock: Arc<MonotonicClock>,
}

impl NotificationDispatcher {
    pub fn new(
        resolver: RecipientResolver,
        store: Arc<dyn NotificationStore>,
        broadcaster: Arc<dyn Broadcaster>,
        config: &Config,
    ) -> Self {
        Self {
            resolver,
            store,
            broadcaster,
            config: config.clone(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Fan an action out to its recipients. Failures are isolated per
    /// recipient and reported, never returned.
    pub async fn dispatch(&self, action: &Action) -> FanoutReport {
        let kind = action.notification_type();
        debug!("Dispatching {} from user {}", kind, action.actor().id);

        let recipients = match self.resolver.resolve(action).await {
            Ok(recipients) => recipients,
            Err(e) => {
                error!("Failed to resolve recipients for {}: {}", kind, e);
                return FanoutReport::default();
            }
        };

        let mut report = FanoutReport {
            recipients: recipients.clone(),
            ..FanoutReport::default()
        };
        if recipients.is_empty() {
            debug!("No recipients for {}, nothing to send", kind);
            return report;
        }

        let payload = build_payload(action);

        for recipient in recipients {
            let notification = Notification::new(recipient, payload.clone(), self.clock.now());
            let notification_id = notification.id;
            let envelope = self.envelope_for(&notification);

            match self.store.insert(notification).await {
                Ok(()) => report.persisted.push(notification_id),
                Err(e) => {
                    warn!(
                        "Failed to store {} notification for user {}: {}",
                        kind, recipient, e
                    );
                    report.persistence_failures += 1;
                }
            }

            // 推送与写库结果无关
            let pushed = match envelope {
                Ok(envelope) => self.broadcaster.push(envelope).await,
                Err(e) => Err(e),
            };
            if let Err(e) = pushed {
                warn!("Failed to push {} to user {}: {}", kind, recipient, e);
                report.broadcast_failures += 1;
            }
        }

        info!(
            "Fan-out of {} by user {}: {} recipient(s), {} stored, {} store failure(s), {} push failure(s)",
            kind,
            action.actor().id,
            report.recipients.len(),
            report.persisted.len(),
            report.persistence_failures,
            report.broadcast_failures
        );
        report
    }

    pub async fn user_followed(&self, actor: ActorSummary, followed_id: UserId) -> FanoutReport {
        self.dispatch(&Action::UserFollowed { actor, followed_id }).await
    }

    pub async fn post_liked(&self, actor: ActorSummary, post: PostRef) -> FanoutReport {
        self.dispatch(&Action::PostLiked { actor, post }).await
    }

    pub async fn post_commented(
        &self,
        actor: ActorSummary,
        post: PostRef,
        comment_id: i64,
        excerpt: String,
    ) -> FanoutReport {
        self.dispatch(&Action::PostCommented {
            actor,
            post,
            comment_id,
            excerpt,
        })
        .await
    }

    pub async fn clip_uploaded(&self, actor: ActorSummary, clip: ClipRef) -> FanoutReport {
        self.dispatch(&Action::ClipUploaded { actor, clip }).await
    }

    pub async fn player_tagged(
        &self,
        actor: ActorSummary,
        player_id: UserId,
        clip: ClipRef,
    ) -> FanoutReport {
        self.dispatch(&Action::PlayerTagged {
            actor,
            player_id,
            clip,
        })
        .await
    }

    pub async fn message_sent(
        &self,
        actor: ActorSummary,
        receiver_id: UserId,
        message_id: i64,
        preview: String,
    ) -> FanoutReport {
        self.dispatch(&Action::MessageSent {
            actor,
            receiver_id,
            message_id,
            preview,
        })
        .await
    }

    /// Realtime event: the stored row plus absolute and relative deep links.
    fn envelope_for(&self, notification: &Notification) -> Result<BroadcastEnvelope> {
        let mut payload = serde_json::to_value(notification)?;
        if let Value::Object(fields) = &mut payload {
            let path = notification.payload.url();
            fields.insert(
                "action_url".to_string(),
                json!(path.map(|p| self.config.frontend_link(p))),
            );
            fields.insert("redirect_to".to_string(), json!(path));
        }
        Ok(BroadcastEnvelope::for_recipient(
            notification.recipient_id,
            notification.kind().as_str(),
            payload,
        ))
    }
}

fn build_payload(action: &Action) -> NotificationPayload {
    match action {
        Action::UserFollowed { actor, .. } => NotificationPayload::UserFollowed(UserFollowedData {
            actor: actor.clone(),
            message: format!("{} started following you", actor.name),
            url: Some(format!("/profile/{}", actor.id)),
        }),
        Action::PostLiked { actor, post } => NotificationPayload::PostLiked(PostLikedData {
            actor: actor.clone(),
            post_id: post.id,
            message: format!("{} liked your clip", actor.name),
            url: Some(format!("/posts/{}", post.id)),
        }),
        Action::PostCommented {
            actor,
            post,
            comment_id,
            excerpt,
        } => NotificationPayload::PostCommented(PostCommentedData {
            actor: actor.clone(),
            post_id: post.id,
            comment_id: *comment_id,
            excerpt: excerpt.chars().take(140).collect(),
            message: format!("{} commented on your clip", actor.name),
            url: Some(format!("/posts/{}#comment-{}", post.id, comment_id)),
        }),
        Action::ClipUploaded { actor, clip } => {
            NotificationPayload::NewClipUploaded(NewClipUploadedData {
                actor: actor.clone(),
                clip_id: clip.id,
                title: clip.title.clone(),
                message: format!("{} uploaded a new clip: {}", actor.name, clip.title),
                url: Some(format!("/clips/{}", clip.id)),
            })
        }
        Action::PlayerTagged {
            actor,
            player_id,
            clip,
        } => NotificationPayload::PlayerTaggedClip(PlayerTaggedClipData {
            actor: actor.clone(),
            player_id: *player_id,
            clip_id: clip.id,
            message: format!("{} tagged a player you follow in {}", actor.name, clip.title),
            url: Some(format!("/clips/{}", clip.id)),
        }),
        Action::MessageSent {
            actor,
            message_id,
            preview,
            ..
        } => NotificationPayload::MessageReceived(MessageReceivedData {
            actor: actor.clone(),
            message_id: *message_id,
            preview: preview.chars().take(140).collect(),
            message: format!("{} sent you a message", actor.name),
            url: Some(format!("/messages/{}", actor.id)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AppError,
        services::{
            store::{MockFollowStore, MockNotificationStore},
            websocket::MockBroadcaster,
        },
    };
    use mockall::predicate::eq;

    fn dispatcher(
        follows: MockFollowStore,
        store: MockNotificationStore,
        broadcaster: MockBroadcaster,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(
            RecipientResolver::new(Arc::new(follows)),
            Arc::new(store),
            Arc::new(broadcaster),
            &Config::default(),
        )
    }

    fn followers(of: i64, ids: Vec<i64>) -> MockFollowStore {
        let mut follows = MockFollowStore::new();
        follows
            .expect_followers_of()
            .with(eq(UserId(of)))
            .returning(move |_| Ok(ids.iter().copied().map(UserId).collect()));
        follows
    }

    fn upload() -> Action {
        Action::ClipUploaded {
            actor: ActorSummary::new(1, "Ace"),
            clip: ClipRef {
                id: 40,
                title: "Fadeaway".to_string(),
            },
        }
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            assert_eq!(next.timestamp_subsec_nanos() % 1000, 0);
            previous = next;
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated_per_recipient() {
        let mut store = MockNotificationStore::new();
        store.expect_insert().times(3).returning(|n| {
            if n.recipient_id == UserId(3) {
                Err(AppError::persistence("disk full"))
            } else {
                Ok(())
            }
        });

        let mut broadcaster = MockBroadcaster::new();
        // recipient 3 still gets a push although its row was not stored
        broadcaster.expect_push().times(3).returning(|_| Ok(()));

        let report = dispatcher(followers(1, vec![2, 3, 4]), store, broadcaster)
            .dispatch(&upload())
            .await;

        assert_eq!(report.recipients, vec![UserId(2), UserId(3), UserId(4)]);
        assert_eq!(report.persisted.len(), 2);
        assert_eq!(report.persistence_failures, 1);
        assert_eq!(report.broadcast_failures, 0);
    }

    #[tokio::test]
    async fn test_broadcast_failure_does_not_touch_persistence() {
        let mut store = MockNotificationStore::new();
        store.expect_insert().times(2).returning(|_| Ok(()));

        let mut broadcaster = MockBroadcaster::new();
        broadcaster
            .expect_push()
            .times(2)
            .returning(|_| Err(AppError::Broadcast("broker down".to_string())));

        let report = dispatcher(followers(1, vec![5, 6]), store, broadcaster)
            .dispatch(&upload())
            .await;

        assert_eq!(report.persisted.len(), 2);
        assert_eq!(report.broadcast_failures, 2);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_no_followers_short_circuits() {
        // no expectations: any store or broadcaster call would panic
        let report = dispatcher(
            followers(1, vec![]),
            MockNotificationStore::new(),
            MockBroadcaster::new(),
        )
        .dispatch(&upload())
        .await;

        assert!(report.recipients.is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_resolver_failure_yields_empty_report() {
        let mut follows = MockFollowStore::new();
        follows
            .expect_followers_of()
            .returning(|_| Err(AppError::persistence("timeout")));

        let report = dispatcher(follows, MockNotificationStore::new(), MockBroadcaster::new())
            .dispatch(&upload())
            .await;
        assert_eq!(report, FanoutReport::default());
    }

    #[tokio::test]
    async fn test_push_targets_recipient_channel_with_links() {
        let mut store = MockNotificationStore::new();
        store.expect_insert().times(1).returning(|_| Ok(()));

        let mut broadcaster = MockBroadcaster::new();
        broadcaster
            .expect_push()
            .withf(|envelope| {
                envelope.channel() == "notifications.3"
                    && envelope.event_name() == "post_liked"
                    && envelope.payload()["type"] == json!("post_liked")
                    && envelope.payload()["redirect_to"] == json!("/posts/12")
                    && envelope.payload()["action_url"] == json!("http://localhost:3001/posts/12")
            })
            .times(1)
            .returning(|_| Ok(()));

        let report = dispatcher(MockFollowStore::new(), store, broadcaster)
            .post_liked(
                ActorSummary::new(4, "Dee"),
                PostRef {
                    id: 12,
                    owner_id: UserId(3),
                },
            )
            .await;
        assert_eq!(report.persisted.len(), 1);
        assert!(report.is_clean());
    }
}
