//! Infrastructure 層
//!
//! Domain 層の trait の具体的な実装（ストア、バックプレーン、メッセージ送信、
//! カタログ、スナップショット）と DTO を提供します。

pub mod backplane;
pub mod catalog;
pub mod dto;
pub mod message_pusher;
pub mod snapshot;
pub mod store;
