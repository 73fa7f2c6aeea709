//! UseCase: ピース状態の管理
//!
//! ピースごとの権威状態（位置・回転・配置済み・バージョン）を扱います。
//!
//! - 移動は「配置済みの確認 → ロック保持の確認 → バージョン確認 → 吸着判定 → 書き込み」の順で行う
//! - 書き込みは、ロックキーがまだ呼び出し元のトークンであることを条件にした
//!   ピースキーへの 1 回の compare-and-swap
//! - 配置済みになったピースのロックはその場で解放する
//! - 完成判定は保存済みの全ピースから計算し、完成通知は完成マーカーの
//!   set-if-absent で 1 回に制限する

use std::sync::Arc;

use kumitate_shared::time::Clock;

use crate::domain::{
    CasOutcome, ConnectionRecord, CoordinationStore, HolderToken, Keyspace, Lease, MoveRequest,
    Piece, PieceId, PuzzleCatalog, PuzzleLayout, RejectReason, Session, SessionEvent, SessionId,
    StoreError, puzzle::is_puzzle_complete, transition,
};

use super::{
    broadcast::EventBroadcaster,
    codec::{decode, encode},
    connection_registry::ConnectionRegistry,
    error::{LockError, MoveError},
    lock_manager::LockManager,
};

/// 受理された移動の結果
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    pub piece: Piece,
    pub is_placed: bool,
    /// 移動後に全ピースが配置済みか
    pub puzzle_completed: bool,
}

/// ピース状態マネージャー
pub struct PieceStateManager {
    store: Arc<dyn CoordinationStore>,
    keys: Keyspace,
    clock: Arc<dyn Clock>,
    catalog: Arc<dyn PuzzleCatalog>,
    registry: Arc<ConnectionRegistry>,
    locks: Arc<LockManager>,
    broadcaster: Arc<EventBroadcaster>,
}

impl PieceStateManager {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: Keyspace,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn PuzzleCatalog>,
        registry: Arc<ConnectionRegistry>,
        locks: Arc<LockManager>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            catalog,
            registry,
            locks,
            broadcaster,
        }
    }

    /// セッションのピースを初期配置で作成する（既存のピースはそのまま）
    ///
    /// 新たに作成したピースの数を返す。
    pub async fn initialize(
        &self,
        session_id: &SessionId,
        layout: &PuzzleLayout,
    ) -> Result<usize, StoreError> {
        let mut created = 0;
        for piece in layout.initial_pieces() {
            let key = self.keys.piece(session_id, piece.id);
            let value = encode(&key, &piece)?;
            if self.store.set_if_absent(&key, &value, None).await? {
                created += 1;
            }
        }
        if created > 0 {
            tracing::info!(
                session_id = %session_id,
                puzzle_id = %layout.puzzle_id,
                created,
                "initialized pieces"
            );
        }
        Ok(created)
    }

    pub async fn piece(
        &self,
        session_id: &SessionId,
        piece_id: PieceId,
    ) -> Result<Option<Piece>, StoreError> {
        let key = self.keys.piece(session_id, piece_id);
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(decode(&key, &raw)?)),
            None => Ok(None),
        }
    }

    /// セッションの全ピースを ID 順で読み出す
    pub async fn load_all(&self, session_id: &SessionId) -> Result<Vec<Piece>, StoreError> {
        let mut pieces = Vec::new();
        for key in self.store.scan(&self.keys.piece_prefix(session_id)).await? {
            // scan と get の間に削除されたキーは飛ばす
            if let Some(raw) = self.store.get(&key).await? {
                pieces.push(decode::<Piece>(&key, &raw)?);
            }
        }
        pieces.sort_by_key(|piece| piece.id);
        Ok(pieces)
    }

    /// 完成通知が既に出ているか
    pub async fn is_announced_complete(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get(&self.keys.completed(session_id))
            .await?
            .is_some())
    }

    /// ピースを掴む（ロックを取得する）
    pub async fn grab(
        &self,
        record: &ConnectionRecord,
        piece_id: PieceId,
    ) -> Result<Lease, LockError> {
        self.ensure_joined(record).await?;
        let session_id = &record.session_id;
        let piece = self
            .piece(session_id, piece_id)
            .await?
            .ok_or(RejectReason::UnknownPiece)?;
        if piece.is_placed {
            return Err(RejectReason::AlreadyPlaced.into());
        }

        let holder = HolderToken::issue(&record.connection_id);
        let lease = self
            .locks
            .acquire(session_id, piece_id, &holder, self.locks.default_ttl())
            .await?
            .ok_or(RejectReason::LockContention)?;

        self.broadcaster
            .publish(
                session_id,
                &[SessionEvent::PieceLocked {
                    piece_id,
                    connection_id: record.connection_id.clone(),
                }],
            )
            .await;
        Ok(lease)
    }

    /// ピースを離す（ロックを解放する）
    ///
    /// 解放できなかった場合（期限切れや他者への移行）は `false`。
    pub async fn release(
        &self,
        record: &ConnectionRecord,
        piece_id: PieceId,
        holder: &HolderToken,
    ) -> Result<bool, LockError> {
        let released = self
            .locks
            .release(&record.session_id, piece_id, holder)
            .await?;
        if released {
            self.broadcaster
                .publish(
                    &record.session_id,
                    &[SessionEvent::PieceReleased { piece_id }],
                )
                .await;
        }
        Ok(released)
    }

    /// ロックを延長する
    pub async fn renew(
        &self,
        record: &ConnectionRecord,
        piece_id: PieceId,
        holder: &HolderToken,
    ) -> Result<Lease, LockError> {
        let lease = self
            .locks
            .renew(&record.session_id, piece_id, holder, self.locks.default_ttl())
            .await?
            .ok_or(RejectReason::LockNotHeld)?;
        Ok(lease)
    }

    /// ピースを移動する
    ///
    /// `holder` は呼び出し元がこのピースに対して持っているトークン（なければ `None`）。
    pub async fn try_move(
        &self,
        record: &ConnectionRecord,
        holder: Option<&HolderToken>,
        request: MoveRequest,
    ) -> Result<MoveOutcome, MoveError> {
        let session_id = &record.session_id;
        let piece_id = request.piece_id;

        let layout = self
            .layout_of(session_id)
            .await?
            .ok_or(RejectReason::UnknownPiece)?;
        let slot = layout.slot(piece_id).ok_or(RejectReason::UnknownPiece)?;

        let key = self.keys.piece(session_id, piece_id);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or(RejectReason::UnknownPiece)?;
        let current: Piece = decode(&key, &raw)?;
        // 配置済みのロックは解放済みなので、保持確認より先に判定する
        if current.is_placed {
            return Err(RejectReason::AlreadyPlaced.into());
        }

        // 1. ロック保持の確認
        let current_holder = self.locks.holder_of(session_id, piece_id).await?;
        let holder = match (current_holder, holder) {
            (Some(current), Some(mine)) if &current == mine => mine,
            (Some(_), _) => return Err(RejectReason::LockContention.into()),
            (None, _) => return Err(RejectReason::LockNotHeld.into()),
        };

        // 2. バージョン確認と吸着判定
        let next = transition::try_move(&current, slot, &layout.snap, &request)?;

        // 3. ロックが自分のものである間だけ書き込む
        let value = encode(&key, &next.state)?;
        let guard = self.locks.guard(session_id, piece_id, holder);
        match self
            .store
            .compare_and_swap(&key, &raw, &value, Some(guard))
            .await?
        {
            CasOutcome::Swapped => {}
            CasOutcome::Mismatch => return Err(RejectReason::StaleVersion.into()),
            CasOutcome::GuardFailed => return Err(RejectReason::LockContention.into()),
        }

        let piece = next.state;
        let mut events = next.events;
        tracing::debug!(
            session_id = %session_id,
            piece_id = %piece_id,
            version = piece.version,
            is_placed = piece.is_placed,
            "move accepted"
        );

        let mut puzzle_completed = false;
        if piece.is_placed {
            match self.locks.release(session_id, piece_id, holder).await {
                Ok(true) => events.push(SessionEvent::PieceReleased { piece_id }),
                Ok(false) => {}
                // 解放できなくてもロックは TTL で切れる
                Err(e) => tracing::warn!(
                    session_id = %session_id,
                    piece_id = %piece_id,
                    "failed to release lock of placed piece: {}",
                    e
                ),
            }
            match self.check_completion(session_id).await {
                Ok((complete, announcement)) => {
                    puzzle_completed = complete;
                    events.extend(announcement);
                }
                Err(e) => tracing::warn!(
                    session_id = %session_id,
                    "failed to check puzzle completion: {}",
                    e
                ),
            }
        }

        self.broadcaster.publish(session_id, &events).await;

        Ok(MoveOutcome {
            is_placed: piece.is_placed,
            piece,
            puzzle_completed,
        })
    }

    /// 全ピースが配置済みかを判定し、未通知であれば完成通知を返す
    async fn check_completion(
        &self,
        session_id: &SessionId,
    ) -> Result<(bool, Option<SessionEvent>), StoreError> {
        let pieces = self.load_all(session_id).await?;
        if !is_puzzle_complete(&pieces) {
            return Ok((false, None));
        }
        let now = self.clock.now_millis().to_string();
        let first = self
            .store
            .set_if_absent(&self.keys.completed(session_id), &now, None)
            .await?;
        if first {
            tracing::info!(session_id = %session_id, pieces = pieces.len(), "puzzle completed");
        }
        Ok((true, transition::completion(&pieces, !first)))
    }

    async fn layout_of(&self, session_id: &SessionId) -> Result<Option<PuzzleLayout>, StoreError> {
        let key = self.keys.session(session_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        if Session::closing_since(&raw).is_some() {
            return Ok(None);
        }
        let session: Session = decode(&key, &raw)?;
        Ok(self.catalog.layout(&session.puzzle_id).await)
    }

    async fn ensure_joined(&self, record: &ConnectionRecord) -> Result<(), LockError> {
        match self.registry.resolve(&record.connection_id).await? {
            Some(current) if current.session_id == record.session_id => Ok(()),
            _ => Err(LockError::NotJoined),
        }
    }
}
