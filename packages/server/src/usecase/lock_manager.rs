//! UseCase: ロックマネージャー
//!
//! ピースごとの短命な単一保持者リースを管理します。
//! 取得は 1 回のアトミックな set-if-absent、解放と延長は保持者トークンの
//! compare-and-delete / compare-and-expire で行い、読んでから書く実装は使いません。
//! 取得できないこと（`None`）は「使用中」という通常の結果であり、ここでは再試行しません。

use std::{sync::Arc, time::Duration};

use kumitate_shared::time::{Clock, duration_to_millis};

use crate::domain::{
    ConnectionId, CoordinationStore, Guard, HolderToken, Keyspace, Lease, PieceId, SessionId,
    StoreError, Timestamp,
};

/// ロックマネージャー
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    keys: Keyspace,
    clock: Arc<dyn Clock>,
    /// 既定のリース長
    ttl: Duration,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: Keyspace,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.ttl
    }

    fn lease(&self, piece_id: PieceId, holder: &HolderToken, ttl: Duration) -> Lease {
        Lease {
            piece_id,
            holder: holder.clone(),
            expires_at: Timestamp::new(
                self.clock
                    .now_millis()
                    .saturating_add(duration_to_millis(ttl)),
            ),
        }
    }

    /// ロックを取得する
    ///
    /// 未保持または期限切れの場合のみ取得でき、`Some(lease)` を返す。
    pub async fn acquire(
        &self,
        session_id: &SessionId,
        piece_id: PieceId,
        holder: &HolderToken,
        ttl: Duration,
    ) -> Result<Option<Lease>, StoreError> {
        let key = self.keys.lock(session_id, piece_id);
        let granted = self
            .store
            .set_if_absent(&key, holder.as_str(), Some(ttl))
            .await?;
        tracing::debug!(
            session_id = %session_id,
            piece_id = %piece_id,
            granted,
            "lock acquire"
        );
        Ok(granted.then(|| self.lease(piece_id, holder, ttl)))
    }

    /// ロックを解放する（保持者トークンが一致する場合のみ）
    pub async fn release(
        &self,
        session_id: &SessionId,
        piece_id: PieceId,
        holder: &HolderToken,
    ) -> Result<bool, StoreError> {
        let key = self.keys.lock(session_id, piece_id);
        let released = self.store.compare_and_delete(&key, holder.as_str()).await?;
        tracing::debug!(
            session_id = %session_id,
            piece_id = %piece_id,
            released,
            "lock release"
        );
        Ok(released)
    }

    /// リースを延長する（保持者トークンが一致し、まだ期限内の場合のみ）
    pub async fn renew(
        &self,
        session_id: &SessionId,
        piece_id: PieceId,
        holder: &HolderToken,
        ttl: Duration,
    ) -> Result<Option<Lease>, StoreError> {
        let key = self.keys.lock(session_id, piece_id);
        let renewed = self
            .store
            .compare_and_expire(&key, holder.as_str(), ttl)
            .await?;
        if !renewed {
            tracing::debug!(session_id = %session_id, piece_id = %piece_id, "lock renewal failed");
        }
        Ok(renewed.then(|| self.lease(piece_id, holder, ttl)))
    }

    /// 現在の保持者
    pub async fn holder_of(
        &self,
        session_id: &SessionId,
        piece_id: PieceId,
    ) -> Result<Option<HolderToken>, StoreError> {
        let key = self.keys.lock(session_id, piece_id);
        Ok(self.store.get(&key).await?.map(HolderToken::from_raw))
    }

    /// ロックキーがまだこの保持者のものであることを条件にする書き込みガード
    pub fn guard(&self, session_id: &SessionId, piece_id: PieceId, holder: &HolderToken) -> Guard {
        Guard {
            key: self.keys.lock(session_id, piece_id),
            value: holder.as_str().to_string(),
        }
    }

    /// 接続が保持しているセッション内のロックをすべて解放する
    ///
    /// 解放できたピースを ID 順で返す。
    pub async fn release_all_for(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Result<Vec<PieceId>, StoreError> {
        let mut released = Vec::new();
        for key in self.store.scan(&self.keys.lock_prefix(session_id)).await? {
            let Some(piece_id) = self.keys.piece_of_lock_key(session_id, &key) else {
                continue;
            };
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            if !HolderToken::from_raw(raw.clone()).belongs_to(connection_id) {
                continue;
            }
            if self.store.compare_and_delete(&key, &raw).await? {
                released.push(piece_id);
            }
        }
        released.sort();
        if !released.is_empty() {
            tracing::info!(
                session_id = %session_id,
                connection_id = %connection_id,
                count = released.len(),
                "released locks of departed connection"
            );
        }
        Ok(released)
    }
}
