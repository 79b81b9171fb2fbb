pub mod auth;
pub mod channel_auth;
pub mod database;
pub mod follow;
pub mod notification;
pub mod realtime;
pub mod recipients;
pub mod store;
pub mod websocket;

// 重新导出常用类型
pub use auth::AuthService;
pub use channel_auth::ChannelAuthorizer;
pub use database::Database;
pub use follow::FollowService;
pub use notification::NotificationService;
pub use realtime::{FanoutReport, NotificationDispatcher};
pub use recipients::RecipientResolver;
pub use websocket::{Broadcaster, WebSocketService};
