//! Redis を使った CoordinationStore 実装
//!
//! 条件付きの操作は Lua スクリプトとして 1 往復で実行するため、
//! 複数ノードから同時に呼ばれてもアトミックです。
//! 接続は `ConnectionManager` が管理し、切断時は自動で再接続されます。

use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, RedisError, Script, aio::ConnectionManager};

use crate::domain::{CasOutcome, CoordinationStore, Guard, StoreError};

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const COMPARE_AND_EXPIRE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

// 0: swapped, 1: value mismatch, 2: guard failed
const COMPARE_AND_SWAP: &str = r#"
if #KEYS > 1 and redis.call('GET', KEYS[2]) ~= ARGV[3] then
    return 2
end
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 1
end
redis.call('SET', KEYS[1], ARGV[2])
return 0
"#;

const SCAN_BATCH: usize = 200;

/// Redis の CoordinationStore
#[derive(Clone)]
pub struct RedisCoordinationStore {
    connection: ConnectionManager,
    compare_and_delete: Script,
    compare_and_expire: Script,
    compare_and_swap: Script,
}

impl RedisCoordinationStore {
    /// Redis に接続してストアを作成
    pub async fn connect(client: Client) -> Result<Self, StoreError> {
        let connection = ConnectionManager::new(client)
            .await
            .map_err(unavailable)?;
        Ok(Self {
            connection,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_expire: Script::new(COMPARE_AND_EXPIRE),
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
        })
    }
}

fn unavailable(error: RedisError) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// SCAN の MATCH パターン用にグロブの特殊文字をエスケープ
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let updated: i64 = self
            .compare_and_expire
            .key(key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(updated > 0)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        guard: Option<Guard>,
    ) -> Result<CasOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.compare_and_swap.key(key);
        invocation.arg(expected).arg(new_value);
        if let Some(guard) = &guard {
            invocation.key(&guard.key).arg(&guard.value);
        }
        let outcome: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        match outcome {
            0 => Ok(CasOutcome::Swapped),
            1 => Ok(CasOutcome::Mismatch),
            2 => Ok(CasOutcome::GuardFailed),
            other => Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: format!("unexpected compare-and-swap reply {other}"),
            }),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let pattern = glob_escape(prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN は同じキーを複数回返すことがある
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let added: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: i64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let mut members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_escape_keeps_prefix_literal() {
        // テスト項目: プレフィックス内のグロブ特殊文字はエスケープされる
        // given (前提条件):
        let prefix = "ns[1]:lock:s?:";

        // when (操作):
        let pattern = glob_escape(prefix);

        // then (期待する結果):
        assert_eq!(pattern, r"ns\[1\]:lock:s\?:*");
    }

    #[test]
    fn test_ttl_is_never_zero_milliseconds() {
        // テスト項目: 1ms 未満の TTL も PX に渡せる値に丸められる
        // given (前提条件):
        let ttl = Duration::from_micros(10);

        // when (操作):
        let millis = ttl_millis(ttl);

        // then (期待する結果):
        assert_eq!(millis, 1);
    }
}
