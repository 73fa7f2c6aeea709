//! UseCase: チャット送信処理
//!
//! 送信者の接続からセッションを解決し、`ChatPosted` イベントとして
//! セッションの全参加者（送信者を含む、全ノード）に配信します。チャットは保存しません。

use std::sync::Arc;

use kumitate_shared::time::Clock;

use crate::domain::{ConnectionId, MessageContent, SessionEvent, Timestamp};

use super::{broadcast::EventBroadcaster, connection_registry::ConnectionRegistry, error::ChatError};

/// チャット送信のユースケース
pub struct SendChatUseCase {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    clock: Arc<dyn Clock>,
}

impl SendChatUseCase {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<EventBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            clock,
        }
    }

    /// チャット送信を実行
    ///
    /// # Returns
    ///
    /// * `Ok(SessionEvent)` - 配信したイベント
    /// * `Err(ChatError)` - 未参加、本文が不正、ストア障害
    pub async fn execute(
        &self,
        from: &ConnectionId,
        text: String,
    ) -> Result<SessionEvent, ChatError> {
        let text = MessageContent::new(text)?;
        let record = self
            .registry
            .resolve(from)
            .await?
            .ok_or(ChatError::NotJoined)?;

        let event = SessionEvent::ChatPosted {
            connection_id: record.connection_id.clone(),
            user_id: record.user_id.clone(),
            display_name: record.display_name.clone(),
            text,
            sent_at: Timestamp::new(self.clock.now_millis()),
        };
        self.broadcaster
            .publish(&record.session_id, std::slice::from_ref(&event))
            .await;
        tracing::debug!(
            session_id = %record.session_id,
            connection_id = %from,
            "chat posted"
        );
        Ok(event)
    }
}
