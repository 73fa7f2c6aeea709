//! UseCase: 再同期
//!
//! ローカル接続に最新のスナップショットを送り直します。
//! バックプレーンの取りこぼしで古くなったクライアントは、次のイベントか、この再同期で回復します。

use std::sync::Arc;

use crate::domain::{ConnectionId, MessagePusher, SessionId};

use super::{error::ResyncError, session_manager::SessionManager};

/// 再同期のユースケース
pub struct ResyncUseCase {
    sessions: Arc<SessionManager>,
    pusher: Arc<dyn MessagePusher>,
}

impl ResyncUseCase {
    pub fn new(sessions: Arc<SessionManager>, pusher: Arc<dyn MessagePusher>) -> Self {
        Self { sessions, pusher }
    }

    /// 1 接続にスナップショットを送る（クライアントの `resync` 要求）
    pub async fn execute(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
    ) -> Result<(), ResyncError> {
        let snapshot = self
            .sessions
            .snapshot(session_id)
            .await?
            .ok_or_else(|| ResyncError::SessionNotFound(session_id.as_str().to_string()))?;
        self.pusher.push_snapshot(connection_id, &snapshot).await?;
        Ok(())
    }

    /// このノードの全ローカル接続にスナップショットを送る
    ///
    /// 送信した接続数を返す。
    pub async fn resync_local(&self) -> usize {
        let mut delivered = 0;
        for session_id in self.pusher.local_sessions().await {
            let snapshot = match self.sessions.snapshot(&session_id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "resync skipped: {}", e);
                    continue;
                }
            };
            for connection_id in self.pusher.local_connections(&session_id).await {
                match self.pusher.push_snapshot(&connection_id, &snapshot).await {
                    Ok(()) => delivered += 1,
                    Err(e) => tracing::debug!(connection_id = %connection_id, "resync push failed: {}", e),
                }
            }
        }
        if delivered > 0 {
            tracing::debug!(delivered, "periodic resync sent");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::test_support::TestCluster;

    #[tokio::test]
    async fn test_resync_local_reaches_every_local_connection() {
        // テスト項目: 定期再同期でこのノードのローカル接続すべてにスナップショットが届く
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let (_alice, mut rx_a) = node.join("alice").await;
        let (_bob, mut rx_b) = node.join("bob").await;
        TestCluster::drain(&mut rx_a);
        TestCluster::drain(&mut rx_b);

        // when (操作):
        let delivered = node.resync.resync_local().await;

        // then (期待する結果):
        assert_eq!(delivered, 2);
        for rx in [&mut rx_a, &mut rx_b] {
            let frames = TestCluster::drain(rx);
            assert_eq!(frames.len(), 1);
            assert!(frames[0].starts_with("{\"type\":\"snapshot\""));
        }
    }

    #[tokio::test]
    async fn test_resync_of_missing_session_fails() {
        // テスト項目: 存在しないセッションの再同期はエラーになる
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let (alice, _rx) = node.join("alice").await;
        let missing = SessionId::new("missing".to_string()).unwrap();

        // when (操作):
        let result = node.resync.execute(&alice.connection_id, &missing).await;

        // then (期待する結果):
        assert!(matches!(result, Err(ResyncError::SessionNotFound(_))));
    }
}
