//! UseCase: スナップショットの書き出し
//!
//! このノードにローカル接続があるセッションの現在の盤面を、定期的に
//! `SnapshotSink` へ書き出します。ライブな同期はこの書き出しに依存しません。

use std::sync::Arc;

use crate::domain::{MessagePusher, SnapshotSink};

use super::session_manager::SessionManager;

pub struct SnapshotWriter {
    sessions: Arc<SessionManager>,
    pusher: Arc<dyn MessagePusher>,
    sink: Arc<dyn SnapshotSink>,
}

impl SnapshotWriter {
    pub fn new(
        sessions: Arc<SessionManager>,
        pusher: Arc<dyn MessagePusher>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        Self {
            sessions,
            pusher,
            sink,
        }
    }

    /// 書き出したセッション数を返す
    pub async fn write_local(&self) -> usize {
        let mut written = 0;
        for session_id in self.pusher.local_sessions().await {
            let snapshot = match self.sessions.snapshot(&session_id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "snapshot skipped: {}", e);
                    continue;
                }
            };
            match self.sink.write(&snapshot).await {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(session_id = %session_id, "{}", e),
            }
        }
        written
    }
}
