use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserId;

/// Prefix of every private per-user notification channel.
pub const USER_CHANNEL_PREFIX: &str = "notifications.";

/// Private channel name for a user: `notifications.{id}`.
pub fn user_channel(user_id: UserId) -> String {
    format!("{}{}", USER_CHANNEL_PREFIX, user_id)
}

/// Transient realtime event addressed to exactly one recipient's private channel.
/// The channel is always derived from the recipient id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastEnvelope {
    recipient_id: UserId,
    channel: String,
    event_name: String,
    payload: serde_json::Value,
}

impl BroadcastEnvelope {
    pub fn for_recipient(
        recipient_id: UserId,
        event_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            recipient_id,
            channel: user_channel(recipient_id),
            event_name: event_name.into(),
            payload,
        }
    }

    pub fn recipient_id(&self) -> UserId {
        self.recipient_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// WebSocket消息类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebSocketMessageType {
    // 系统消息
    Connect,
    Ping,
    Pong,
    Error,

    // 订阅管理
    Subscribe,
    Unsubscribe,
    SubscribeAck,
    UnsubscribeAck,

    // 通知消息
    Notification,
}

/// Server-to-client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketMessage {
    pub id: String,
    pub message_type: WebSocketMessageType,
    pub channel: Option<String>,
    pub event: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Client-to-server frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub message_type: WebSocketMessageType,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub channels: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub channels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub connection_id: String,
    pub timestamp: DateTime<Utc>,
    pub client_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ChannelStats {
    pub channel: String,
    pub subscriber_count: usize,
}

#[derive(Debug, Serialize)]
pub struct WebSocketStats {
    pub total_connections: usize,
    pub active_users: usize,
    pub channels: Vec<ChannelStats>,
}

impl WebSocketMessage {
    pub fn new(message_type: WebSocketMessageType, data: serde_json::Value) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4()),
            message_type,
            channel: None,
            event: None,
            data,
            timestamp: Utc::now(),
        }
    }

    /// 创建通知消息
    pub fn notification(envelope: &BroadcastEnvelope) -> Self {
        Self {
            channel: Some(envelope.channel().to_string()),
            event: Some(envelope.event_name().to_string()),
            ..Self::new(WebSocketMessageType::Notification, envelope.payload().clone())
        }
    }

    /// 创建错误消息
    pub fn error(code: &str, message: &str, details: Option<serde_json::Value>) -> Self {
        let error_data = ErrorMessage {
            code: code.to_string(),
            message: message.to_string(),
            details,
        };

        Self::new(
            WebSocketMessageType::Error,
            serde_json::to_value(error_data).unwrap_or_default(),
        )
    }

    /// 创建心跳消息
    pub fn pong(connection_id: &str, client_timestamp: Option<DateTime<Utc>>) -> Self {
        let heartbeat = HeartbeatMessage {
            connection_id: connection_id.to_string(),
            timestamp: Utc::now(),
            client_timestamp,
        };

        Self::new(
            WebSocketMessageType::Pong,
            serde_json::to_value(heartbeat).unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_name_generation() {
        assert_eq!(user_channel(UserId(123)), "notifications.123");
    }

    #[test]
    fn test_envelope_targets_recipient_channel() {
        let envelope = BroadcastEnvelope::for_recipient(UserId(9), "post_liked", json!({"post_id": 1}));
        assert_eq!(envelope.channel(), "notifications.9");
        assert_eq!(envelope.recipient_id(), UserId(9));

        let message = WebSocketMessage::notification(&envelope);
        assert_eq!(message.message_type, WebSocketMessageType::Notification);
        assert_eq!(message.channel.as_deref(), Some("notifications.9"));
        assert_eq!(message.event.as_deref(), Some("post_liked"));
        assert_eq!(message.data, json!({"post_id": 1}));
    }

    #[test]
    fn test_error_message_creation() {
        let error_msg = WebSocketMessage::error(
            "AUTHORIZATION_ERROR",
            "Channel denied",
            Some(json!({"channel": "notifications.2"})),
        );

        assert_eq!(error_msg.message_type, WebSocketMessageType::Error);
        assert_eq!(error_msg.data["code"], json!("AUTHORIZATION_ERROR"));
    }

    #[test]
    fn test_client_frame_without_data() {
        let frame: ClientFrame = serde_json::from_str(r#"{"message_type":"ping"}"#).unwrap();
        assert_eq!(frame.message_type, WebSocketMessageType::Ping);
        assert!(frame.data.is_null());
    }
}
