//! インメモリの CoordinationStore 実装
//!
//! 単一プロセス用の実装です。同じインスタンスを複数のノードで共有すれば、
//! 1 プロセス内でマルチノード構成を再現できます。
//! 期限切れの判定は注入された `Clock` で行うため、テストでは `ManualClock` を使って
//! スリープせずに TTL の経過を再現できます。

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{CasOutcome, CoordinationStore, Guard, StoreError};
use kumitate_shared::time::{Clock, SystemClock, duration_to_millis};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Members(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// インメモリの CoordinationStore
pub struct InMemoryCoordinationStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCoordinationStore {
    /// システム時計を使うストアを作成
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// 指定した時計を使うストアを作成
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn expiry(&self, now: i64, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| now.saturating_add(duration_to_millis(ttl)))
    }
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 期限切れのエントリを取り除いたうえで、生きているエントリを返す
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: i64,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn live_text(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    now: i64,
) -> Result<Option<String>, StoreError> {
    match live_entry(entries, key, now) {
        None => Ok(None),
        Some(Entry {
            value: Value::Text(text),
            ..
        }) => Ok(Some(text.clone())),
        Some(_) => Err(wrong_type(key)),
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: "operation against a key holding the wrong kind of value".to_string(),
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        live_text(&mut entries, key, now)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: self.expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        let existed = live_entry(&mut entries, key, now).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        if live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: self.expiry(now, ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        if live_text(&mut entries, key, now)?.as_deref() != Some(expected) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let expires_at = self.expiry(now, Some(ttl));
        let mut entries = self.entries.lock().await;
        if live_text(&mut entries, key, now)?.as_deref() != Some(expected) {
            return Ok(false);
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = expires_at;
        }
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        guard: Option<Guard>,
    ) -> Result<CasOutcome, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        if let Some(guard) = guard
            && live_text(&mut entries, &guard.key, now)?.as_deref() != Some(guard.value.as_str())
        {
            return Ok(CasOutcome::GuardFailed);
        }
        if live_text(&mut entries, key, now)?.as_deref() != Some(expected) {
            return Ok(CasOutcome::Mismatch);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(new_value.to_string()),
                expires_at: None,
            },
        );
        Ok(CasOutcome::Swapped)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        live_entry(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Members(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Members(members) => Ok(members.insert(member.to_string())),
            Value::Text(_) => Err(wrong_type(key)),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        let Some(entry) = live_entry(&mut entries, key, now) else {
            return Ok(false);
        };
        let (removed, now_empty) = match &mut entry.value {
            Value::Members(members) => (members.remove(member), members.is_empty()),
            Value::Text(_) => return Err(wrong_type(key)),
        };
        // 空になった集合はキーごと消える
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Members(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumitate_shared::time::ManualClock;

    fn create_test_store() -> (InMemoryCoordinationStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (InMemoryCoordinationStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_if_absent_succeeds_again_after_ttl() {
        // テスト項目: TTL 付きのキーは期限切れ後に再び set_if_absent できる
        // given (前提条件):
        let (store, clock) = create_test_store();
        let ttl = Some(Duration::from_millis(500));
        assert!(store.set_if_absent("k", "a", ttl).await.unwrap());

        // when (操作):
        let while_live = store.set_if_absent("k", "b", ttl).await.unwrap();
        clock.advance(Duration::from_millis(500));
        let after_expiry = store.set_if_absent("k", "b", ttl).await.unwrap();

        // then (期待する結果):
        assert!(!while_live);
        assert!(after_expiry);
        assert_eq!(store.get("k").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_compare_and_delete_requires_exact_value() {
        // テスト項目: compare_and_delete は値が一致したときだけ削除する
        // given (前提条件):
        let (store, _clock) = create_test_store();
        store.set("k", "token-a", None).await.unwrap();

        // when (操作):
        let wrong = store.compare_and_delete("k", "token-b").await.unwrap();
        let right = store.compare_and_delete("k", "token-a").await.unwrap();

        // then (期待する結果):
        assert!(!wrong);
        assert!(right);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_expire_extends_lease() {
        // テスト項目: compare_and_expire で期限を延長でき、値が違えば延長されない
        // given (前提条件):
        let (store, clock) = create_test_store();
        store
            .set("k", "a", Some(Duration::from_millis(100)))
            .await
            .unwrap();

        // when (操作):
        clock.advance(Duration::from_millis(80));
        let renewed = store
            .compare_and_expire("k", "a", Duration::from_millis(100))
            .await
            .unwrap();
        let foreign = store
            .compare_and_expire("k", "b", Duration::from_millis(1_000))
            .await
            .unwrap();
        clock.advance(Duration::from_millis(80));

        // then (期待する結果):
        assert!(renewed);
        assert!(!foreign);
        assert_eq!(store.get("k").await.unwrap(), Some("a".to_string()));
        clock.advance(Duration::from_millis(20));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_swap_checks_guard_before_value() {
        // テスト項目: ガード不一致は GuardFailed、値の不一致は Mismatch、両方一致で Swapped
        // given (前提条件):
        let (store, _clock) = create_test_store();
        store.set("piece", "v0", None).await.unwrap();
        store.set("lock", "me", None).await.unwrap();
        let guard = |value: &str| {
            Some(Guard {
                key: "lock".to_string(),
                value: value.to_string(),
            })
        };

        // when (操作):
        let guard_failed = store
            .compare_and_swap("piece", "v0", "v1", guard("other"))
            .await
            .unwrap();
        let mismatch = store
            .compare_and_swap("piece", "stale", "v1", guard("me"))
            .await
            .unwrap();
        let swapped = store
            .compare_and_swap("piece", "v0", "v1", guard("me"))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(guard_failed, CasOutcome::GuardFailed);
        assert_eq!(mismatch, CasOutcome::Mismatch);
        assert_eq!(swapped, CasOutcome::Swapped);
        assert_eq!(store.get("piece").await.unwrap(), Some("v1".to_string()));
    }

    #[tokio::test]
    async fn test_scan_skips_expired_keys() {
        // テスト項目: scan は期限切れのキーを返さない
        // given (前提条件):
        let (store, clock) = create_test_store();
        store.set("ns:hb:a", "1", Some(Duration::from_millis(10))).await.unwrap();
        store.set("ns:hb:b", "1", None).await.unwrap();
        store.set("ns:conn:a", "{}", None).await.unwrap();

        // when (操作):
        clock.advance(Duration::from_millis(10));
        let keys = store.scan("ns:hb:").await.unwrap();

        // then (期待する結果):
        assert_eq!(keys, vec!["ns:hb:b".to_string()]);
    }

    #[tokio::test]
    async fn test_set_operations_remove_empty_set() {
        // テスト項目: 集合が空になるとキー自体が消える
        // given (前提条件):
        let (store, _clock) = create_test_store();
        assert!(store.set_add("members", "a").await.unwrap());
        assert!(!store.set_add("members", "a").await.unwrap());

        // when (操作):
        let removed = store.set_remove("members", "a").await.unwrap();

        // then (期待する結果):
        assert!(removed);
        assert!(store.set_members("members").await.unwrap().is_empty());
        assert!(store.scan("members").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_kind_of_value_is_reported() {
        // テスト項目: 文字列キーに集合操作をすると Corrupt エラーになる
        // given (前提条件):
        let (store, _clock) = create_test_store();
        store.set("k", "text", None).await.unwrap();

        // when (操作):
        let result = store.set_add("k", "member").await;

        // then (期待する結果):
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
