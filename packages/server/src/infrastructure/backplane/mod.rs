//! Backplane の実装
//!
//! - `inmemory`: `tokio::sync::broadcast` によるプロセス内実装
//! - `redis`: Redis Pub/Sub 実装

pub mod inmemory;
pub mod redis;

pub use inmemory::InMemoryBackplane;
pub use redis::RedisBackplane;
