use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures::{sink::SinkExt, stream::StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    error::{AppError, Result},
    models::{user::UserId, websocket::*},
    services::channel_auth::ChannelAuthorizer,
};

/// Best-effort realtime delivery to a recipient's private channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Enqueue the event for currently connected subscribers and return
    /// without waiting for delivery.
    async fn push(&self, envelope: BroadcastEnvelope) -> Result<()>;
}

/// 连接信息
#[derive(Debug, Clone)]
struct ConnectionInfo {
    user_id: UserId,
    tx: mpsc::UnboundedSender<WebSocketMessage>,
    connected_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    subscriptions: HashSet<String>,
}

/// In-process pub/sub broker over WebSocket connections.
#[derive(Clone)]
pub struct WebSocketService {
    // 连接管理
    connections: Arc<RwLock<HashMap<String, ConnectionInfo>>>,
    // 用户到连接的映射
    user_connections: Arc<RwLock<HashMap<UserId, HashSet<String>>>>,
    // 频道订阅管理
    channel_subscriptions: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    authorizer: ChannelAuthorizer,
    stale_after: chrono::Duration,
    ping_every: Duration,
}

impl WebSocketService {
    pub fn new(authorizer: ChannelAuthorizer, stale_after: Duration) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            user_connections: Arc::new(RwLock::new(HashMap::new())),
            channel_subscriptions: Arc::new(RwLock::new(HashMap::new())),
            authorizer,
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            // 服务端心跳，客户端的 Pong 会刷新活跃时间
            ping_every: (stale_after / 3).max(Duration::from_secs(1)),
        }
    }

    /// 启动清理任务
    pub fn start_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                service.cleanup_stale_connections();
            }
        })
    }

    /// 处理新的WebSocket连接
    pub async fn handle_connection(&self, websocket: WebSocket, user_id: UserId, connection_id: String) {
        info!("New WebSocket connection: {} for user: {}", connection_id, user_id);

        let (mut ws_tx, mut ws_rx) = websocket.split();
        let mut rx = self.register_connection(user_id, &connection_id);

        let ping_every = self.ping_every;
        let connection_id_clone = connection_id.clone();
        let mut send_task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(ping_every);
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        match serde_json::to_string(&message) {
                            Ok(json_str) => {
                                if let Err(e) = ws_tx.send(Message::Text(json_str)).await {
                                    warn!("Failed to send WebSocket message: {}", e);
                                    return;
                                }
                            }
                            Err(e) => {
                                error!("Failed to serialize message: {}", e);
                            }
                        }
                    }
                    _ = heartbeat.tick() => {
                        if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                            return;
                        }
                    }
                }
            }

            // 连接已被注销（包括清理任务），关闭套接字
            let _ = ws_tx.send(Message::Close(None)).await;
            debug!("Send task ended for connection: {}", connection_id_clone);
        });

        let mut send_finished = false;
        loop {
            tokio::select! {
                _ = &mut send_task => {
                    send_finished = true;
                    info!("Outbox of connection {} closed, dropping socket", connection_id);
                    break;
                }
                msg_result = ws_rx.next() => {
                    let Some(msg_result) = msg_result else { break };
                    match msg_result {
                        Ok(Message::Text(text)) => {
                            self.touch(&connection_id);
                            if let Err(e) = self.handle_incoming_message(&connection_id, user_id, &text) {
                                warn!("Rejected frame from connection {}: {}", connection_id, e);
                                let _ = self.send_to_connection(
                                    &connection_id,
                                    WebSocketMessage::error("BAD_REQUEST", &e.to_string(), None),
                                );
                            }
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                            self.touch(&connection_id);
                        }
                        Ok(Message::Binary(data)) => {
                            debug!("Ignoring binary frame of {} bytes", data.len());
                        }
                        Ok(Message::Close(_)) => {
                            info!("WebSocket connection closed: {}", connection_id);
                            break;
                        }
                        Err(e) => {
                            warn!("WebSocket error for connection {}: {}", connection_id, e);
                            break;
                        }
                    }
                }
            }
        }

        // 注销后发送端全部释放，发送任务随之结束
        self.unregister_connection(&connection_id);
        if !send_finished {
            let _ = send_task.await;
        }
    }

    /// Register a connection and auto-subscribe it to its owner's channel.
    /// Returns the connection's outbox.
    pub fn register_connection(
        &self,
        user_id: UserId,
        connection_id: &str,
    ) -> mpsc::UnboundedReceiver<WebSocketMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Utc::now();

        let connect_msg = WebSocketMessage::new(
            WebSocketMessageType::Connect,
            json!({
                "connection_id": connection_id,
                "user_id": user_id,
                "timestamp": now
            }),
        );
        let _ = tx.send(connect_msg);

        self.connections.write().insert(
            connection_id.to_string(),
            ConnectionInfo {
                user_id,
                tx,
                connected_at: now,
                last_seen_at: now,
                subscriptions: HashSet::new(),
            },
        );
        self.user_connections
            .write()
            .entry(user_id)
            .or_default()
            .insert(connection_id.to_string());

        if let Err(e) = self.subscribe_to_channel(connection_id, &user_channel(user_id)) {
            warn!("Auto-subscribe failed for connection {}: {}", connection_id, e);
        }

        debug!("Registered connection: {} for user: {}", connection_id, user_id);
        rx
    }

    /// 注销连接
    pub fn unregister_connection(&self, connection_id: &str) {
        let Some(conn) = self.connections.write().remove(connection_id) else {
            return;
        };

        {
            let mut user_connections = self.user_connections.write();
            if let Some(user_conns) = user_connections.get_mut(&conn.user_id) {
                user_conns.remove(connection_id);
                if user_conns.is_empty() {
                    user_connections.remove(&conn.user_id);
                }
            }
        }

        let mut channel_subscriptions = self.channel_subscriptions.write();
        for channel in &conn.subscriptions {
            if let Some(subscribers) = channel_subscriptions.get_mut(channel) {
                subscribers.remove(connection_id);
                if subscribers.is_empty() {
                    channel_subscriptions.remove(channel);
                }
            }
        }

        info!(
            "Unregistered connection: {} for user: {} (open since {})",
            connection_id, conn.user_id, conn.connected_at
        );
    }

    /// 处理传入消息
    pub fn handle_incoming_message(&self, connection_id: &str, user_id: UserId, text: &str) -> Result<()> {
        debug!("Received message from {}: {}", connection_id, text);

        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;

        match frame.message_type {
            WebSocketMessageType::Ping => {
                let client_timestamp = frame
                    .data
                    .get("timestamp")
                    .and_then(|ts| ts.as_str())
                    .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                self.send_to_connection(connection_id, WebSocketMessage::pong(connection_id, client_timestamp))
            }
            WebSocketMessageType::Subscribe => {
                let request: SubscribeRequest = serde_json::from_value(frame.data)
                    .map_err(|e| AppError::BadRequest(format!("Invalid subscribe request: {}", e)))?;
                self.handle_subscribe(connection_id, user_id, request)
            }
            WebSocketMessageType::Unsubscribe => {
                let request: UnsubscribeRequest = serde_json::from_value(frame.data)
                    .map_err(|e| AppError::BadRequest(format!("Invalid unsubscribe request: {}", e)))?;
                for channel in &request.channels {
                    self.unsubscribe_from_channel(connection_id, channel);
                }
                self.send_to_connection(
                    connection_id,
                    WebSocketMessage::new(
                        WebSocketMessageType::UnsubscribeAck,
                        json!({ "unsubscribed_channels": request.channels }),
                    ),
                )
            }
            other => Err(AppError::BadRequest(format!(
                "Unsupported client message type: {:?}",
                other
            ))),
        }
    }

    /// Every requested channel goes through the authorizer, every time.
    fn handle_subscribe(&self, connection_id: &str, user_id: UserId, request: SubscribeRequest) -> Result<()> {
        let mut subscribed_channels = Vec::new();

        for channel in request.channels {
            match self.authorizer.authorize_subscription(user_id, &channel) {
                Ok(canonical) => {
                    self.subscribe_to_channel(connection_id, &canonical)?;
                    subscribed_channels.push(canonical);
                }
                Err(e) => {
                    warn!("User {} not authorized to subscribe to channel: {}", user_id, channel);
                    self.send_to_connection(
                        connection_id,
                        WebSocketMessage::error(
                            "AUTHORIZATION_ERROR",
                            &e.to_string(),
                            Some(json!({ "channel": channel })),
                        ),
                    )?;
                }
            }
        }

        self.send_to_connection(
            connection_id,
            WebSocketMessage::new(
                WebSocketMessageType::SubscribeAck,
                json!({ "subscribed_channels": subscribed_channels }),
            ),
        )
    }

    /// Only registered connections can subscribe. The connection map stays
    /// locked until the channel entry is written so a concurrent unregister
    /// cannot leave it behind.
    fn subscribe_to_channel(&self, connection_id: &str, channel: &str) -> Result<()> {
        let mut connections = self.connections.write();
        let Some(conn) = connections.get_mut(connection_id) else {
            return Err(AppError::NotFound(format!("Connection not found: {}", connection_id)));
        };
        conn.subscriptions.insert(channel.to_string());
        self.channel_subscriptions
            .write()
            .entry(channel.to_string())
            .or_default()
            .insert(connection_id.to_string());
        drop(connections);

        debug!("Connection {} subscribed to channel: {}", connection_id, channel);
        Ok(())
    }

    fn unsubscribe_from_channel(&self, connection_id: &str, channel: &str) {
        if let Some(conn) = self.connections.write().get_mut(connection_id) {
            conn.subscriptions.remove(channel);
        }

        let mut channel_subscriptions = self.channel_subscriptions.write();
        if let Some(subscribers) = channel_subscriptions.get_mut(channel) {
            subscribers.remove(connection_id);
            if subscribers.is_empty() {
                channel_subscriptions.remove(channel);
            }
        }

        debug!("Connection {} unsubscribed from channel: {}", connection_id, channel);
    }

    /// 发送消息到指定连接
    pub fn send_to_connection(&self, connection_id: &str, message: WebSocketMessage) -> Result<()> {
        let tx = self
            .connections
            .read()
            .get(connection_id)
            .map(|conn| conn.tx.clone());

        match tx {
            Some(tx) => tx.send(message).map_err(|_| {
                AppError::Broadcast(format!("Connection {} outbox closed", connection_id))
            }),
            None => Err(AppError::NotFound(format!("Connection not found: {}", connection_id))),
        }
    }

    /// Enqueue on every subscriber of `channel`. Returns how many outboxes took it.
    pub fn broadcast_to_channel(&self, channel: &str, message: WebSocketMessage) -> Result<usize> {
        let subscribers = self.channel_subscriptions.read().get(channel).cloned();

        let Some(subscribers) = subscribers else {
            debug!("No live subscribers on channel {}", channel);
            return Ok(0);
        };

        debug!("Broadcasting to channel {} with {} subscribers", channel, subscribers.len());

        let mut delivered = 0;
        for connection_id in &subscribers {
            match self.send_to_connection(connection_id, message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to broadcast to connection {}: {}", connection_id, e),
            }
        }

        if delivered == 0 && !subscribers.is_empty() {
            return Err(AppError::Broadcast(format!(
                "No subscriber of {} accepted the event",
                channel
            )));
        }
        Ok(delivered)
    }

    fn touch(&self, connection_id: &str) {
        if let Some(conn) = self.connections.write().get_mut(connection_id) {
            conn.last_seen_at = Utc::now();
        }
    }

    /// 清理过期连接
    pub fn cleanup_stale_connections(&self) -> usize {
        let threshold = Utc::now() - self.stale_after;
        let stale: Vec<String> = self
            .connections
            .read()
            .iter()
            .filter(|(_, conn)| conn.last_seen_at < threshold)
            .map(|(id, _)| id.clone())
            .collect();

        for connection_id in &stale {
            warn!("Cleaning up stale connection: {}", connection_id);
            self.unregister_connection(connection_id);
        }
        stale.len()
    }

    /// 获取在线统计
    pub fn get_stats(&self) -> WebSocketStats {
        let channels = self
            .channel_subscriptions
            .read()
            .iter()
            .map(|(channel, subscribers)| ChannelStats {
                channel: channel.clone(),
                subscriber_count: subscribers.len(),
            })
            .collect();

        WebSocketStats {
            total_connections: self.connections.read().len(),
            active_users: self.user_connections.read().len(),
            channels,
        }
    }
}

#[async_trait]
impl Broadcaster for WebSocketService {
    async fn push(&self, envelope: BroadcastEnvelope) -> Result<()> {
        let message = WebSocketMessage::notification(&envelope);
        let delivered = self.broadcast_to_channel(envelope.channel(), message)?;
        debug!(
            "Pushed {} to {} ({} connection(s))",
            envelope.event_name(),
            envelope.channel(),
            delivered
        );
        Ok(())
    }
}
