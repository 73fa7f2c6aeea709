//! CoordinationStore trait 定義
//!
//! すべてのノードから到達できる共有キーバリューストアのインターフェースです。
//! ロックの所有者とピースのバージョンの唯一の真実はここにあります。
//! 条件付き書き込みはすべて 1 回のアトミック操作として実装されなければなりません
//! （読んでから書く実装は不可）。具体的な実装は Infrastructure 層が提供します。

use std::time::Duration;

use async_trait::async_trait;

use super::error::StoreError;

/// `compare_and_swap` で追加で検証するキーと値
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub key: String,
    pub value: String,
}

/// `compare_and_swap` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// 値を置き換えた
    Swapped,
    /// 現在値が期待値と異なる（キーが存在しない場合を含む）
    Mismatch,
    /// ガードキーの値が一致しない
    GuardFailed,
}

/// 共有コーディネーションストア
///
/// TTL 付きのキーは期限切れと同時に存在しないものとして扱われる。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// 無条件に書き込む（`ttl` が `None` なら期限なし）
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// 削除する。キーが存在した場合 `true`
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// キーが存在しない（または期限切れの）場合のみ書き込む
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// 現在値が `expected` の場合のみ削除する
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// 現在値が `expected` の場合のみ TTL を付け直す
    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// ガードが成立し、かつ現在値が `expected` の場合のみ `new_value` に置き換える
    ///
    /// 既存の TTL は維持しない（置き換え後は期限なし）。
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        guard: Option<Guard>,
    ) -> Result<CasOutcome, StoreError>;

    /// 指定したプレフィックスで始まる、期限切れでないキーの一覧
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// 集合に追加する。新たに追加された場合 `true`
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// 集合から削除する。削除された場合 `true`
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
}
