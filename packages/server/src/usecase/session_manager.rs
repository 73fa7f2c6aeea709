//! UseCase: セッション（グループ）管理
//!
//! セッションへの参加・退出と、参加直後に渡すスナップショットを扱います。
//!
//! ## 参加
//!
//! 1. カタログからパズル定義を取得（なければ `UNKNOWN_PUZZLE`）
//! 2. セッション本体を set-if-absent で作成し、全ピースを set-if-absent で初期化
//!    （別ノードでの同時の初回参加も 1 つの初期状態に収束する）
//! 3. 保留中の破棄（idle マーカー）を取り消す
//! 4. 接続を登録し、メンバー集合に追加する
//! 5. セッション本体の `revision` を compare-and-swap で進める。失敗したら
//!    （破棄と競合した）バックオフして 1 からやり直す
//! 6. このノードでセッションのチャネルを購読し、`UserJoined` を発行してスナップショットを返す
//!
//! ## 退出
//!
//! 接続の登録解除で得たレコードを使い、保持中のロックをすべて解放してから
//! 参加者を取り除きます。登録解除の後の失敗はログに残して処理を続け、
//! `UserLeft` は必ず発行します。最後の参加者が抜けたセッションには idle マーカーを付け、
//! 猶予期間の後にリーパーが破棄します。
//!
//! ## 破棄
//!
//! 本体を読む → 参加者がいないことを確認 → 読んだ値を条件に本体を破棄中の印へ置き換え
//! → 残りのキーを削除 → 印を削除、の順で行います。

use std::{sync::Arc, time::Duration};

use kumitate_shared::{
    backoff::{Backoff, BackoffConfig},
    time::{Clock, duration_to_millis},
};

use crate::domain::{
    CasOutcome, ConnectionId, ConnectionRecord, CoordinationStore, DisplayName, Keyspace,
    NodeId, Participant, PuzzleCatalog, PuzzleId, PuzzleLayout, PusherChannel, Session,
    SessionId, SessionSnapshot, StoreError, Timestamp, UserId, puzzle::is_puzzle_complete,
    transition,
};

use super::{
    broadcast::EventBroadcaster,
    codec::{decode, encode},
    connection_registry::ConnectionRegistry,
    error::JoinError,
    lock_manager::LockManager,
    piece_state::PieceStateManager,
};

/// 破棄中の印がこれより古ければ、破棄したノードが途中で落ちたとみなす
const STALE_CLOSING: Duration = Duration::from_secs(30);

/// 破棄中のセッションへの参加を待つ間隔
fn join_retry() -> BackoffConfig {
    BackoffConfig {
        initial_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_delay: Duration::from_millis(200),
        max_retries: 10,
        jitter: 0.2,
    }
}

/// セッション本体の読み出し結果
enum SessionEntry {
    Ready { session: Session, raw: String },
    /// 破棄中、または破棄された直後
    Closing,
}

/// 参加リクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub connection_id: ConnectionId,
    pub session_id: SessionId,
    pub puzzle_id: PuzzleId,
    pub user_id: UserId,
    pub display_name: DisplayName,
}

/// 参加結果
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub record: ConnectionRecord,
    pub participant: Participant,
    pub snapshot: SessionSnapshot,
}

/// セッションマネージャー
pub struct SessionManager {
    store: Arc<dyn CoordinationStore>,
    keys: Keyspace,
    clock: Arc<dyn Clock>,
    node_id: NodeId,
    catalog: Arc<dyn PuzzleCatalog>,
    registry: Arc<ConnectionRegistry>,
    locks: Arc<LockManager>,
    pieces: Arc<PieceStateManager>,
    broadcaster: Arc<EventBroadcaster>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: Keyspace,
        clock: Arc<dyn Clock>,
        node_id: NodeId,
        catalog: Arc<dyn PuzzleCatalog>,
        registry: Arc<ConnectionRegistry>,
        locks: Arc<LockManager>,
        pieces: Arc<PieceStateManager>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            node_id,
            catalog,
            registry,
            locks,
            pieces,
            broadcaster,
        }
    }

    /// セッションに参加する
    ///
    /// `sender` はこの接続へのローカル送信チャネル。以後のセッションイベントはここに届く。
    pub async fn join(
        &self,
        request: JoinRequest,
        sender: PusherChannel,
    ) -> Result<JoinOutcome, JoinError> {
        let layout = self
            .catalog
            .layout(&request.puzzle_id)
            .await
            .ok_or_else(|| JoinError::UnknownPuzzle(request.puzzle_id.as_str().to_string()))?;

        if self.registry.resolve(&request.connection_id).await?.is_some() {
            return Err(JoinError::AlreadyJoined);
        }

        let record = ConnectionRecord {
            connection_id: request.connection_id,
            session_id: request.session_id,
            user_id: request.user_id,
            display_name: request.display_name,
            joined_at: Timestamp::new(self.clock.now_millis()),
            node_id: self.node_id.clone(),
        };

        let mut backoff = Backoff::new(join_retry());
        let session = loop {
            match self.enter(&record, &layout).await {
                Ok(Some(session)) => break session,
                Ok(None) => match backoff.next_delay() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        self.abandon(&record).await;
                        return Err(JoinError::Store(StoreError::Unavailable(format!(
                            "session '{}' is being destroyed",
                            record.session_id
                        ))));
                    }
                },
                Err(e) => {
                    self.abandon(&record).await;
                    return Err(e);
                }
            }
        };

        let mut current = self.with_members(session).await?;
        current.participant_ids.remove(&record.connection_id);
        let participant = record.participant();
        let next = transition::join(&current, participant.clone());

        if let Err(e) = self
            .broadcaster
            .attach_local(record.connection_id.clone(), current.id.clone(), sender)
            .await
        {
            // 購読できなくてもローカル配信は続く（定期処理で購読し直す）
            tracing::warn!(
                session_id = %current.id,
                "failed to subscribe to session channel: {}",
                e
            );
        }
        self.broadcaster.publish(&current.id, &next.events).await;

        let snapshot = self
            .snapshot(&current.id)
            .await?
            .ok_or(StoreError::Corrupt {
                key: self.keys.session(&current.id),
                reason: "session vanished during join".to_string(),
            })?;

        tracing::info!(
            session_id = %record.session_id,
            connection_id = %record.connection_id,
            user_id = %record.user_id,
            participants = snapshot.participants.len(),
            "participant joined"
        );

        Ok(JoinOutcome {
            record,
            participant,
            snapshot,
        })
    }

    /// セッションから退出する（明示的な退出、切断、リーパーから共通）
    ///
    /// 既に回収済みの接続は `None`。
    pub async fn leave(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let Some(record) = self.registry.unregister(connection_id).await? else {
            tracing::debug!(connection_id = %connection_id, "connection already cleaned up");
            return Ok(None);
        };
        let session_id = record.session_id.clone();

        // レコードは既に消えていて再試行されないので、ここから先は失敗しても退出を通知する
        let released = self
            .locks
            .release_all_for(&session_id, connection_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(
                    session_id = %session_id,
                    connection_id = %connection_id,
                    "failed to release locks, leaving them to expire: {}",
                    e
                );
                Vec::new()
            });
        if let Err(e) = self
            .store
            .set_remove(&self.keys.members(&session_id), connection_id.as_str())
            .await
        {
            tracing::warn!(
                session_id = %session_id,
                connection_id = %connection_id,
                "failed to remove member, leaving it to be pruned: {}",
                e
            );
        }
        self.broadcaster.detach_local(connection_id, &session_id).await;

        let session = match self.session(&session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::warn!(
                    session_id = %session_id,
                    connection_id = %connection_id,
                    "left a session that no longer exists"
                );
                return Ok(Some(record));
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, "failed to read session on leave: {}", e);
                let events = transition::departure_events(&record, &released);
                self.broadcaster.publish(&session_id, &events).await;
                return Ok(Some(record));
            }
        };
        let before = match self.with_members(session).await {
            Ok(mut before) => {
                before.participant_ids.insert(connection_id.clone());
                before
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, "failed to read members on leave: {}", e);
                let events = transition::departure_events(&record, &released);
                self.broadcaster.publish(&session_id, &events).await;
                return Ok(Some(record));
            }
        };
        let next = transition::leave(&before, &record, &released);
        self.broadcaster.publish(&session_id, &next.events).await;

        if next.state.is_empty() {
            self.mark_idle(&session_id).await?;
        }

        tracing::info!(
            session_id = %session_id,
            connection_id = %connection_id,
            released_locks = released.len(),
            "participant left"
        );
        Ok(Some(record))
    }

    /// このノードのローカル配信から接続を外す（ストアの状態は変更しない）
    pub async fn detach_local(&self, connection_id: &ConnectionId, session_id: &SessionId) {
        self.broadcaster.detach_local(connection_id, session_id).await;
    }

    /// セッションの全状態
    ///
    /// 参加者一覧はこの時点で整合させる（接続レコードのないメンバーを取り除く）。
    pub async fn snapshot(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SessionSnapshot>, StoreError> {
        let Some(session) = self.session(session_id).await? else {
            return Ok(None);
        };
        let mut participants: Vec<Participant> = self
            .reconcile_members(session_id)
            .await?
            .iter()
            .map(ConnectionRecord::participant)
            .collect();
        participants.sort_by(|a, b| {
            (a.joined_at, &a.connection_id).cmp(&(b.joined_at, &b.connection_id))
        });
        let pieces = self.pieces.load_all(session_id).await?;

        Ok(Some(SessionSnapshot {
            session_id: session.id,
            puzzle_id: session.puzzle_id,
            completed: is_puzzle_complete(&pieces),
            pieces,
            participants,
            taken_at: Timestamp::new(self.clock.now_millis()),
        }))
    }

    /// セッション本体（参加者集合は含まない）
    ///
    /// 破棄中のセッションは `None`。
    pub async fn session(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError> {
        let key = self.keys.session(session_id);
        match self.store.get(&key).await? {
            Some(raw) if Session::closing_since(&raw).is_none() => Ok(Some(decode(&key, &raw)?)),
            _ => Ok(None),
        }
    }

    /// メンバー集合を接続レジストリと突き合わせ、生きているレコードを返す
    ///
    /// 接続レコードのないメンバーは集合から取り除く。
    pub async fn reconcile_members(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConnectionRecord>, StoreError> {
        let members_key = self.keys.members(session_id);
        let mut records = Vec::new();
        for member in self.store.set_members(&members_key).await? {
            let record = match ConnectionId::new(member.clone()) {
                Ok(connection_id) => self.registry.resolve(&connection_id).await?,
                Err(_) => None,
            };
            match record {
                Some(record) if &record.session_id == session_id => records.push(record),
                _ => {
                    self.store.set_remove(&members_key, &member).await?;
                    tracing::info!(
                        session_id = %session_id,
                        member = %member,
                        "pruned stale member"
                    );
                }
            }
        }
        Ok(records)
    }

    /// 空のセッションに idle マーカーを付ける（既に付いていれば何もしない）
    pub async fn mark_idle(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let now = self.clock.now_millis().to_string();
        let marked = self
            .store
            .set_if_absent(&self.keys.idle(session_id), &now, None)
            .await?;
        if marked {
            tracing::info!(session_id = %session_id, "session is empty, destruction pending");
        }
        Ok(marked)
    }

    /// 参加者のいないセッションを破棄する
    ///
    /// 本体を読んでから参加者を確認し、本体が読んだ値のままであることを条件に
    /// 破棄中の印へ置き換えてからキーを削除する。参加と競合した場合は何もせず `false`。
    pub async fn destroy(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let key = self.keys.session(session_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(false);
        };
        if Session::closing_since(&raw).is_some() {
            return Ok(false);
        }
        if !self.reconcile_members(session_id).await?.is_empty() {
            return Ok(false);
        }

        let marker = Session::closing_marker(Timestamp::new(self.clock.now_millis()));
        if self.store.compare_and_swap(&key, &raw, &marker, None).await? != CasOutcome::Swapped {
            tracing::info!(session_id = %session_id, "session was joined, destruction cancelled");
            return Ok(false);
        }
        self.purge(session_id).await?;
        self.store.compare_and_delete(&key, &marker).await?;
        tracing::info!(session_id = %session_id, "session destroyed");
        Ok(true)
    }

    /// セッション本体以外のキーをすべて削除する
    async fn purge(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let mut keys = self.store.scan(&self.keys.piece_prefix(session_id)).await?;
        keys.extend(self.store.scan(&self.keys.lock_prefix(session_id)).await?);
        keys.push(self.keys.completed(session_id));
        keys.push(self.keys.members(session_id));
        keys.push(self.keys.idle(session_id));
        for key in &keys {
            self.store.delete(key).await?;
        }
        Ok(())
    }

    /// 接続をセッションに入れる
    ///
    /// 破棄と競合した場合は `None`（呼び出し元がやり直す）。登録とメンバー追加は冪等。
    async fn enter(
        &self,
        record: &ConnectionRecord,
        layout: &PuzzleLayout,
    ) -> Result<Option<Session>, JoinError> {
        let session_id = &record.session_id;
        let SessionEntry::Ready { session, raw } =
            self.ensure_session(session_id, &layout.puzzle_id).await?
        else {
            return Ok(None);
        };
        self.pieces.initialize(session_id, layout).await?;
        self.store.delete(&self.keys.idle(session_id)).await?;
        self.registry.register(record).await?;
        self.store
            .set_add(&self.keys.members(session_id), record.connection_id.as_str())
            .await?;

        // 参加者の確認より前に本体を読んだ破棄は、この書き換えで失敗する
        let key = self.keys.session(session_id);
        let touched = Session {
            revision: session.revision + 1,
            ..session
        };
        let value = encode(&key, &touched)?;
        match self.store.compare_and_swap(&key, &raw, &value, None).await? {
            CasOutcome::Swapped => Ok(Some(touched)),
            outcome => {
                tracing::debug!(session_id = %session_id, ?outcome, "session changed during join");
                Ok(None)
            }
        }
    }

    /// 失敗した参加の登録を取り消す
    async fn abandon(&self, record: &ConnectionRecord) {
        if let Err(e) = self.registry.unregister(&record.connection_id).await {
            tracing::warn!(connection_id = %record.connection_id, "failed to undo registration: {}", e);
        }
        if let Err(e) = self
            .store
            .set_remove(&self.keys.members(&record.session_id), record.connection_id.as_str())
            .await
        {
            tracing::warn!(connection_id = %record.connection_id, "failed to undo membership: {}", e);
        }
    }

    async fn ensure_session(
        &self,
        session_id: &SessionId,
        puzzle_id: &PuzzleId,
    ) -> Result<SessionEntry, JoinError> {
        let key = self.keys.session(session_id);
        let fresh = Session::new(
            session_id.clone(),
            puzzle_id.clone(),
            Timestamp::new(self.clock.now_millis()),
        );
        let value = encode(&key, &fresh)?;
        if self.store.set_if_absent(&key, &value, None).await? {
            tracing::info!(session_id = %session_id, puzzle_id = %puzzle_id, "session created");
            return Ok(SessionEntry::Ready {
                session: fresh,
                raw: value,
            });
        }

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(SessionEntry::Closing);
        };
        if let Some(since) = Session::closing_since(&raw) {
            let elapsed = self.clock.now_millis().saturating_sub(since.value());
            if elapsed >= duration_to_millis(STALE_CLOSING) {
                tracing::warn!(session_id = %session_id, "finishing an abandoned destruction");
                self.purge(session_id).await?;
                self.store.compare_and_delete(&key, &raw).await?;
            }
            return Ok(SessionEntry::Closing);
        }
        let existing: Session = decode(&key, &raw)?;
        if &existing.puzzle_id != puzzle_id {
            return Err(JoinError::PuzzleMismatch {
                session_id: session_id.as_str().to_string(),
                puzzle_id: existing.puzzle_id.into_string(),
            });
        }
        Ok(SessionEntry::Ready {
            session: existing,
            raw,
        })
    }

    async fn with_members(&self, mut session: Session) -> Result<Session, StoreError> {
        session.participant_ids = self
            .store
            .set_members(&self.keys.members(&session.id))
            .await?
            .into_iter()
            .filter_map(|member| ConnectionId::new(member).ok())
            .collect();
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::PieceId,
        usecase::test_support::{ScriptedStore, TestCluster},
    };
    use tokio::sync::{mpsc, oneshot};

    #[tokio::test]
    async fn test_first_join_creates_session_and_returns_snapshot() {
        // テスト項目: 最初の参加でセッションとピースが作成され、スナップショットが返される
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let (tx, _rx) = mpsc::unbounded_channel();

        // when (操作):
        let outcome = node
            .sessions
            .join(TestCluster::join_request("c-alice", "alice"), tx)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(outcome.snapshot.pieces.len(), 4);
        assert!(outcome.snapshot.pieces.iter().all(|piece| piece.version == 0));
        assert_eq!(outcome.snapshot.participants, vec![outcome.participant.clone()]);
        assert!(!outcome.snapshot.completed);
    }

    #[tokio::test]
    async fn test_join_rejects_unknown_puzzle_and_duplicate_connection() {
        // テスト項目: 未知のパズルは UNKNOWN_PUZZLE、同じ接続の再参加は ALREADY_JOINED
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let (tx, _rx) = mpsc::unbounded_channel();
        node.sessions
            .join(TestCluster::join_request("c-alice", "alice"), tx.clone())
            .await
            .unwrap();
        let unknown = JoinRequest {
            puzzle_id: PuzzleId::new("missing".to_string()).unwrap(),
            ..TestCluster::join_request("c-bob", "bob")
        };

        // when (操作):
        let unknown = node.sessions.join(unknown, tx.clone()).await;
        let duplicate = node
            .sessions
            .join(TestCluster::join_request("c-alice", "alice"), tx)
            .await;

        // then (期待する結果):
        assert_eq!(unknown, Err(JoinError::UnknownPuzzle("missing".to_string())));
        assert_eq!(duplicate, Err(JoinError::AlreadyJoined));
    }

    #[tokio::test]
    async fn test_join_with_other_puzzle_is_rejected() {
        // テスト項目: 既存セッションに別のパズルで参加すると拒否される
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let (tx, _rx) = mpsc::unbounded_channel();
        node.sessions
            .join(TestCluster::join_request("c-alice", "alice"), tx.clone())
            .await
            .unwrap();
        let other = JoinRequest {
            puzzle_id: PuzzleId::new("grid-4x4".to_string()).unwrap(),
            ..TestCluster::join_request("c-bob", "bob")
        };

        // when (操作):
        let result = node.sessions.join(other, tx).await;

        // then (期待する結果):
        assert!(matches!(result, Err(JoinError::PuzzleMismatch { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_first_joins_converge() {
        // テスト項目: 別ノードでの同時の初回参加でも初期状態は 1 つに収束する
        // given (前提条件):
        let cluster = TestCluster::new();
        let node_a = cluster.node("node-a");
        let node_b = cluster.node("node-b");
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        // when (操作):
        let (a, b) = tokio::join!(
            node_a
                .sessions
                .join(TestCluster::join_request("c-alice", "alice"), tx_a),
            node_b
                .sessions
                .join(TestCluster::join_request("c-bob", "bob"), tx_b),
        );

        // then (期待する結果):
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.snapshot.pieces, b.snapshot.pieces);
        let snapshot = node_a
            .sessions
            .snapshot(&TestCluster::session_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.participants.len(), 2);
    }

    #[tokio::test]
    async fn test_leave_releases_locks_and_notifies_others() {
        // テスト項目: 退出時に保持中のロックが解放され、他の参加者に通知される
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let (alice, _rx_a) = node.join("alice").await;
        let (_bob, mut rx_b) = node.join("bob").await;
        node.pieces
            .grab(&alice, crate::domain::PieceId::new(2))
            .await
            .unwrap();
        TestCluster::drain(&mut rx_b);

        // when (操作):
        let left = node.sessions.leave(&alice.connection_id).await.unwrap();
        let again = node.sessions.leave(&alice.connection_id).await.unwrap();

        // then (期待する結果):
        assert_eq!(left, Some(alice.clone()));
        assert_eq!(again, None);
        let frames = TestCluster::drain(&mut rx_b);
        assert!(frames[0].contains("\"type\":\"piece-released\""));
        assert!(frames[1].contains("\"type\":\"user-left\""));
        assert_eq!(
            node.locks
                .holder_of(&alice.session_id, crate::domain::PieceId::new(2))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_last_leave_marks_idle_and_rejoin_cancels() {
        // テスト項目: 最後の参加者が抜けると idle になり、再参加で取り消される
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let (alice, _rx) = node.join("alice").await;
        let idle_key = cluster.keys().idle(&alice.session_id);

        // when (操作):
        node.sessions.leave(&alice.connection_id).await.unwrap();
        let idle_after_leave = cluster.store.get(&idle_key).await.unwrap();
        let (_bob, _rx_b) = node.join("bob").await;
        let idle_after_join = cluster.store.get(&idle_key).await.unwrap();

        // then (期待する結果):
        assert!(idle_after_leave.is_some());
        assert!(idle_after_join.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_prunes_members_without_record() {
        // テスト項目: 接続レコードのないメンバーはスナップショット取得時に取り除かれる
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let (alice, _rx) = node.join("alice").await;
        let members_key = cluster.keys().members(&alice.session_id);
        cluster.store.set_add(&members_key, "ghost").await.unwrap();

        // when (操作):
        let snapshot = node
            .sessions
            .snapshot(&alice.session_id)
            .await
            .unwrap()
            .unwrap();

        // then (期待する結果):
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(
            cluster.store.set_members(&members_key).await.unwrap(),
            vec![alice.connection_id.as_str().to_string()]
        );
    }

    #[tokio::test]
    async fn test_leave_notifies_even_if_lock_release_fails() {
        // テスト項目: ロックの解放に失敗しても退出は完了し、他の参加者に user-left が届く
        // given (前提条件):
        let cluster = TestCluster::new();
        let store = Arc::new(ScriptedStore::new(cluster.store.clone()));
        let node = cluster.node_with_store("node-a", store.clone());
        let (alice, _rx_a) = node.join("alice").await;
        let (bob, mut rx_b) = node.join("bob").await;
        node.pieces.grab(&alice, PieceId::new(1)).await.unwrap();
        TestCluster::drain(&mut rx_b);

        // when (操作):
        store.fail_scans(true);
        let left = node.sessions.leave(&alice.connection_id).await;
        store.fail_scans(false);

        // then (期待する結果):
        assert_eq!(left, Ok(Some(alice.clone())));
        let frames = TestCluster::drain(&mut rx_b);
        assert!(frames.iter().any(|f| f.contains("\"type\":\"user-left\"")));
        assert!(!frames.iter().any(|f| f.contains("\"type\":\"piece-released\"")));
        assert_eq!(
            cluster
                .store
                .set_members(&cluster.keys().members(&alice.session_id))
                .await
                .unwrap(),
            vec![bob.connection_id.as_str().to_string()]
        );
    }

    #[tokio::test]
    async fn test_join_racing_destroy_keeps_the_session() {
        // テスト項目: 破棄が参加者を確認した直後に別ノードで参加があっても、セッションは破棄されない
        // given (前提条件):
        let cluster = TestCluster::new();
        let store = Arc::new(ScriptedStore::new(cluster.store.clone()));
        let destroyer = cluster.node_with_store("node-a", store.clone());
        let joiner = Arc::new(cluster.node("node-b"));
        let (alice, _rx_a) = destroyer.join("alice").await;
        destroyer.sessions.leave(&alice.connection_id).await.unwrap();

        let (done_tx, done_rx) = oneshot::channel();
        let late = joiner.clone();
        store
            .after_next_members_read(async move {
                let (tx, rx) = mpsc::unbounded_channel();
                let outcome = late
                    .sessions
                    .join(TestCluster::join_request("c-bob", "bob"), tx)
                    .await;
                let _ = done_tx.send((outcome, rx));
            })
            .await;

        // when (操作):
        let destroyed = destroyer.sessions.destroy(&alice.session_id).await.unwrap();
        let (outcome, _rx_b) = done_rx.await.unwrap();

        // then (期待する結果):
        assert!(!destroyed);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.snapshot.pieces.len(), 4);
        let snapshot = joiner
            .sessions
            .snapshot(&alice.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.pieces.len(), 4);
        assert_eq!(snapshot.participants, vec![outcome.participant]);
    }

    #[tokio::test]
    async fn test_destroy_removes_every_key_of_an_empty_session() {
        // テスト項目: 空のセッションの破棄で本体・ピース・メンバーのキーがすべて消える
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let (alice, _rx) = node.join("alice").await;
        node.sessions.leave(&alice.connection_id).await.unwrap();

        // when (操作):
        let destroyed = node.sessions.destroy(&alice.session_id).await.unwrap();

        // then (期待する結果):
        assert!(destroyed);
        assert!(node.sessions.session(&alice.session_id).await.unwrap().is_none());
        assert!(
            cluster
                .store
                .scan(&cluster.keys().piece_prefix(&alice.session_id))
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            cluster
                .store
                .get(&cluster.keys().session(&alice.session_id))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_join_finishes_an_abandoned_destruction() {
        // テスト項目: 破棄の途中でノードが落ちて残った印は、時間が経てば参加時に片付けられる
        // given (前提条件):
        let cluster = TestCluster::new();
        let node = cluster.node("node-a");
        let session_id = TestCluster::session_id();
        let keys = cluster.keys();
        cluster
            .store
            .set(
                &keys.session(&session_id),
                &Session::closing_marker(Timestamp::new(1_000_000)),
                None,
            )
            .await
            .unwrap();
        cluster
            .store
            .set(&keys.piece(&session_id, PieceId::new(0)), "left over", None)
            .await
            .unwrap();
        cluster.clock.advance(STALE_CLOSING);

        // when (操作):
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = node
            .sessions
            .join(TestCluster::join_request("c-alice", "alice"), tx)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(outcome.snapshot.pieces.len(), 4);
        assert!(outcome.snapshot.pieces.iter().all(|piece| piece.version == 0));
    }
}
