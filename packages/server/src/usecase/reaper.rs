//! UseCase: リーパー
//!
//! すべてのノードで定期的に実行する回収処理です。複数ノードで同時に動いても安全です
//! （回収の主体は compare-and-delete に勝った 1 ノードだけ）。
//!
//! 1. ハートビートが切れた接続を暗黙的に退出させる（ロック解放 → `UserLeft`）
//! 2. 接続レコードのないメンバーをメンバー集合から取り除く
//! 3. 猶予期間を過ぎても空の idle セッションを、最終スナップショットを書き出してから破棄する

use std::{sync::Arc, time::Duration};

use kumitate_shared::time::{Clock, duration_to_millis};

use crate::domain::{CoordinationStore, Keyspace, SessionId, SnapshotSink, StoreError};

use super::{connection_registry::ConnectionRegistry, session_manager::SessionManager};

/// 1 回の回収結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// ハートビート切れで退出させた接続数
    pub reaped_connections: usize,
    /// 参加者のいないまま idle マーカーを付けたセッション数
    pub orphaned_sessions: usize,
    pub destroyed_sessions: Vec<SessionId>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.reaped_connections == 0
            && self.orphaned_sessions == 0
            && self.destroyed_sessions.is_empty()
    }
}

/// リーパー
pub struct Reaper {
    store: Arc<dyn CoordinationStore>,
    keys: Keyspace,
    clock: Arc<dyn Clock>,
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionManager>,
    sink: Arc<dyn SnapshotSink>,
    /// 空になったセッションを破棄するまでの猶予
    grace: Duration,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: Keyspace,
        clock: Arc<dyn Clock>,
        registry: Arc<ConnectionRegistry>,
        sessions: Arc<SessionManager>,
        sink: Arc<dyn SnapshotSink>,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            registry,
            sessions,
            sink,
            grace,
        }
    }

    /// 回収を 1 回実行する
    pub async fn run_once(&self) -> Result<ReapReport, StoreError> {
        let mut report = ReapReport {
            reaped_connections: self.reap_dead_connections().await?,
            ..ReapReport::default()
        };
        report.orphaned_sessions = self.prune_members().await?;
        report.destroyed_sessions = self.destroy_idle_sessions().await?;
        if !report.is_empty() {
            tracing::info!(
                reaped_connections = report.reaped_connections,
                orphaned_sessions = report.orphaned_sessions,
                destroyed_sessions = report.destroyed_sessions.len(),
                "reaper pass finished"
            );
        }
        Ok(report)
    }

    async fn reap_dead_connections(&self) -> Result<usize, StoreError> {
        let mut reaped = 0;
        for connection_id in self.registry.connection_ids().await? {
            if self.registry.is_alive(&connection_id).await? {
                continue;
            }
            if let Some(record) = self.sessions.leave(&connection_id).await? {
                tracing::info!(
                    connection_id = %connection_id,
                    session_id = %record.session_id,
                    node_id = %record.node_id,
                    "reaped connection with expired heartbeat"
                );
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn prune_members(&self) -> Result<usize, StoreError> {
        let mut orphaned = 0;
        for key in self.store.scan(&self.keys.members_prefix()).await? {
            let Some(session_id) = self.keys.session_of_members_key(&key) else {
                continue;
            };
            let live = self.sessions.reconcile_members(&session_id).await?;
            if live.is_empty()
                && self.sessions.session(&session_id).await?.is_some()
                && self.sessions.mark_idle(&session_id).await?
            {
                orphaned += 1;
            }
        }
        Ok(orphaned)
    }

    async fn destroy_idle_sessions(&self) -> Result<Vec<SessionId>, StoreError> {
        let now = self.clock.now_millis();
        let grace = duration_to_millis(self.grace);
        let mut destroyed = Vec::new();

        for key in self.store.scan(&self.keys.idle_prefix()).await? {
            let Some(session_id) = self.keys.session_of_idle_key(&key) else {
                continue;
            };
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let since = raw.parse::<i64>().unwrap_or(0);
            if now.saturating_sub(since) < grace {
                continue;
            }
            // 破棄の担当を 1 ノードに決める（参加で idle マーカーが消えていれば負ける）
            if !self.store.compare_and_delete(&key, &raw).await? {
                continue;
            }
            if !self.sessions.reconcile_members(&session_id).await?.is_empty() {
                continue;
            }

            if let Some(snapshot) = self.sessions.snapshot(&session_id).await?
                && let Err(e) = self.sink.write(&snapshot).await
            {
                tracing::warn!(session_id = %session_id, "failed to write final snapshot: {}", e);
            }
            if self.sessions.destroy(&session_id).await? {
                destroyed.push(session_id);
            }
        }

        destroyed.sort();
        Ok(destroyed)
    }
}
