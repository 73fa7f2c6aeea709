//! CoordinationStore の実装
//!
//! - `inmemory`: 単一プロセス用（テストやシングルノード構成）
//! - `redis`: 複数ノードで共有する Redis 実装

pub mod inmemory;
pub mod redis;

pub use inmemory::InMemoryCoordinationStore;
pub use redis::RedisCoordinationStore;
