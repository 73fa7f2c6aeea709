//! WebSocket を使った MessagePusher 実装
//!
//! ## 責務
//!
//! - このノードに接続しているクライアントの `UnboundedSender` を、所属セッションとともに管理
//! - クライアントへのメッセージ送信（push_to, broadcast_session）
//!
//! ## 設計ノート
//!
//! WebSocket の生成は UI 層（`ui/handler/websocket.rs`）で行われます。
//! この実装は生成された `UnboundedSender` を受け取り、メッセージ送信に使用します。
//! 他ノードに接続しているクライアントはここには現れません（Backplane 経由で届きます）。

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{
        ConnectionId, MessagePushError, MessagePusher, PusherChannel, SessionEvent, SessionId,
        SessionSnapshot,
    },
    infrastructure::dto::websocket::ServerMessage,
};

struct LocalConnection {
    session_id: SessionId,
    sender: PusherChannel,
}

/// WebSocket を使った MessagePusher 実装
///
/// ## 使用例
///
/// ```ignore
/// let pusher = WebSocketMessagePusher::new();
/// pusher.register(connection_id.clone(), session_id.clone(), tx).await;
/// pusher.broadcast_session(&session_id, "{\"type\":\"pong\"}").await;
/// ```
pub struct WebSocketMessagePusher {
    /// Key: connection_id
    connections: Mutex<HashMap<ConnectionId, LocalConnection>>,
}

impl WebSocketMessagePusher {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for WebSocketMessagePusher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePusher for WebSocketMessagePusher {
    async fn register(&self, connection_id: ConnectionId, session_id: SessionId, sender: PusherChannel) {
        let mut connections = self.connections.lock().await;
        tracing::debug!(
            connection_id = %connection_id,
            session_id = %session_id,
            "connection registered to MessagePusher"
        );
        connections.insert(connection_id, LocalConnection { session_id, sender });
    }

    async fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let mut connections = self.connections.lock().await;
        let Some(removed) = connections.remove(connection_id) else {
            return false;
        };
        tracing::debug!(connection_id = %connection_id, "connection unregistered from MessagePusher");
        !connections
            .values()
            .any(|connection| connection.session_id == removed.session_id)
    }

    async fn push_to(
        &self,
        connection_id: &ConnectionId,
        content: &str,
    ) -> Result<(), MessagePushError> {
        let connections = self.connections.lock().await;

        if let Some(connection) = connections.get(connection_id) {
            connection
                .sender
                .send(content.to_string())
                .map_err(|e| MessagePushError::PushFailed(e.to_string()))?;
            tracing::trace!(connection_id = %connection_id, "pushed message");
            Ok(())
        } else {
            Err(MessagePushError::ConnectionNotFound(
                connection_id.as_str().to_string(),
            ))
        }
    }

    async fn broadcast_session(&self, session_id: &SessionId, content: &str) -> usize {
        let connections = self.connections.lock().await;
        let mut delivered = 0;

        for (connection_id, connection) in connections.iter() {
            if &connection.session_id != session_id {
                continue;
            }
            // ブロードキャストでは一部の送信失敗を許容
            if let Err(e) = connection.sender.send(content.to_string()) {
                tracing::warn!(connection_id = %connection_id, "failed to push message: {}", e);
            } else {
                delivered += 1;
            }
        }

        delivered
    }

    async fn push_event(&self, session_id: &SessionId, event: &SessionEvent) -> usize {
        let message = ServerMessage::from_event(session_id, event.clone());
        match message.to_json() {
            Some(json) => self.broadcast_session(session_id, &json).await,
            None => 0,
        }
    }

    async fn push_snapshot(
        &self,
        connection_id: &ConnectionId,
        snapshot: &SessionSnapshot,
    ) -> Result<(), MessagePushError> {
        let json = ServerMessage::from(snapshot.clone())
            .to_json()
            .ok_or_else(|| MessagePushError::PushFailed("snapshot encoding failed".to_string()))?;
        self.push_to(connection_id, &json).await
    }

    async fn local_connections(&self, session_id: &SessionId) -> Vec<ConnectionId> {
        let connections = self.connections.lock().await;
        let mut ids: Vec<ConnectionId> = connections
            .iter()
            .filter(|(_, connection)| &connection.session_id == session_id)
            .map(|(connection_id, _)| connection_id.clone())
            .collect();
        ids.sort();
        ids
    }

    async fn local_sessions(&self) -> Vec<SessionId> {
        let connections = self.connections.lock().await;
        connections
            .values()
            .map(|connection| connection.session_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
