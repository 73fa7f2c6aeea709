//! UseCase: 接続レジストリ
//!
//! 接続 ID から (セッション, ユーザー) を引けるよう、接続レコードを
//! コーディネーションストアに複製します。どのノードからでも、自分が受け付けていない
//! 接続を解決・回収できます。
//!
//! 接続の生存はハートビートキー（TTL 付き）で表し、キーが消えた接続はリーパーが回収します。

use std::{sync::Arc, time::Duration};

use kumitate_shared::time::Clock;

use crate::domain::{ConnectionId, ConnectionRecord, CoordinationStore, Keyspace, StoreError};

use super::codec::{decode, encode};

/// 接続レジストリ
pub struct ConnectionRegistry {
    store: Arc<dyn CoordinationStore>,
    keys: Keyspace,
    clock: Arc<dyn Clock>,
    heartbeat_ttl: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: Keyspace,
        clock: Arc<dyn Clock>,
        heartbeat_ttl: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            heartbeat_ttl,
        }
    }

    /// 接続を登録する（再登録は上書き）
    ///
    /// 登録と同時にハートビートも記録する。
    pub async fn register(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        let key = self.keys.connection(&record.connection_id);
        let value = encode(&key, record)?;
        self.store.set(&key, &value, None).await?;
        self.heartbeat(&record.connection_id).await?;
        tracing::debug!(
            connection_id = %record.connection_id,
            session_id = %record.session_id,
            "connection registered"
        );
        Ok(())
    }

    pub async fn resolve(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let key = self.keys.connection(connection_id);
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(decode(&key, &raw)?)),
            None => Ok(None),
        }
    }

    /// 接続を登録解除し、削除したレコードを返す
    ///
    /// 値の一致を条件に削除するため、複数ノードが同時に呼んでもレコードを受け取るのは
    /// 1 つだけ。存在しない接続は `None`（既に回収済み）であり、エラーではない。
    pub async fn unregister(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let key = self.keys.connection(connection_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        if !self.store.compare_and_delete(&key, &raw).await? {
            return Ok(None);
        }
        self.store.delete(&self.keys.heartbeat(connection_id)).await?;
        let record: ConnectionRecord = decode(&key, &raw)?;
        tracing::debug!(
            connection_id = %connection_id,
            session_id = %record.session_id,
            "connection unregistered"
        );
        Ok(Some(record))
    }

    /// ハートビートを記録する
    pub async fn heartbeat(&self, connection_id: &ConnectionId) -> Result<(), StoreError> {
        let now = self.clock.now_millis().to_string();
        self.store
            .set(
                &self.keys.heartbeat(connection_id),
                &now,
                Some(self.heartbeat_ttl),
            )
            .await
    }

    /// ハートビートが期限内か
    pub async fn is_alive(&self, connection_id: &ConnectionId) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get(&self.keys.heartbeat(connection_id))
            .await?
            .is_some())
    }

    /// 登録されているすべての接続 ID
    pub async fn connection_ids(&self) -> Result<Vec<ConnectionId>, StoreError> {
        Ok(self
            .store
            .scan(&self.keys.connection_prefix())
            .await?
            .iter()
            .filter_map(|key| self.keys.connection_of_key(key))
            .collect())
    }
}
