use std::{sync::Arc, time::Duration};

use crate::{
    config::Config,
    services::{
        auth::AuthService,
        channel_auth::ChannelAuthorizer,
        follow::FollowService,
        notification::NotificationService,
        realtime::NotificationDispatcher,
        recipients::RecipientResolver,
        store::{FollowStore, MemoryFollowStore, MemoryNotificationStore, NotificationStore},
        websocket::WebSocketService,
    },
};

/// Backends the services are wired onto.
#[derive(Clone)]
pub struct Stores {
    pub notifications: Arc<dyn NotificationStore>,
    pub follows: Arc<dyn FollowStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            notifications: Arc::new(MemoryNotificationStore::new()),
            follows: Arc::new(MemoryFollowStore::new()),
        }
    }
}

/// 应用程序的共享状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 认证服务
    pub auth_service: Arc<AuthService>,

    /// 频道授权
    pub channel_authorizer: ChannelAuthorizer,

    /// WebSocket 推送
    pub websocket_service: Arc<WebSocketService>,

    /// 通知分发
    pub dispatcher: NotificationDispatcher,

    /// 通知服务
    pub notification_service: NotificationService,

    /// 关注服务
    pub follow_service: FollowService,
}

impl AppState {
    pub fn build(config: &Config, stores: Stores) -> Self {
        let channel_authorizer = ChannelAuthorizer::new(
            config.broadcast_app_key.clone(),
            config.broadcast_app_secret.clone(),
        );
        let websocket_service = Arc::new(WebSocketService::new(
            channel_authorizer.clone(),
            Duration::from_secs(config.ws_stale_after_secs),
        ));

        let dispatcher = NotificationDispatcher::new(
            RecipientResolver::new(stores.follows.clone()),
            stores.notifications.clone(),
            websocket_service.clone(),
            config,
        );

        Self {
            config: config.clone(),
            auth_service: Arc::new(AuthService::new(config)),
            channel_authorizer,
            notification_service: NotificationService::new(stores.notifications, config),
            follow_service: FollowService::new(stores.follows, dispatcher.clone()),
            dispatcher,
            websocket_service,
        }
    }
}
