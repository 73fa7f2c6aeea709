//! UseCase 層
//!
//! 同期コアの各コンポーネント（ロック、接続レジストリ、ブロードキャスト、ピース状態、
//! セッション管理）と、それらを組み合わせたユースケースを Domain 層の trait に対して実装します。

mod broadcast;
mod codec;
mod connection_registry;
pub mod error;
mod get_session_detail;
mod lock_manager;
mod piece_state;
mod reaper;
mod resync;
mod send_chat;
mod session_manager;
mod snapshot_writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use broadcast::EventBroadcaster;
pub use connection_registry::ConnectionRegistry;
pub use error::{
    ChatError, GetSessionDetailError, JoinError, LockError, MoveError, ResyncError,
};
pub use get_session_detail::{GetSessionDetailUseCase, SessionDetail};
pub use lock_manager::LockManager;
pub use piece_state::{MoveOutcome, PieceStateManager};
pub use reaper::{ReapReport, Reaper};
pub use resync::ResyncUseCase;
pub use send_chat::SendChatUseCase;
pub use session_manager::{JoinOutcome, JoinRequest, SessionManager};
pub use snapshot_writer::SnapshotWriter;
