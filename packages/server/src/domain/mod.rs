//! Domain 層
//!
//! 値オブジェクト・エンティティ・純粋な状態遷移関数と、外部の協調者
//! （コーディネーションストア、バックプレーン、メッセージ送信、カタログ、永続化）の
//! trait を定義します。このモジュールは他の層に依存しません。

pub mod backplane;
pub mod catalog;
pub mod coordination;
pub mod entity;
pub mod error;
pub mod event;
pub mod keyspace;
pub mod message_pusher;
pub mod puzzle;
pub mod replica;
pub mod transition;
pub mod value_object;

pub use backplane::{Backplane, BackplaneMessage, Subscription};
pub use catalog::{PuzzleCatalog, SnapshotSink, SnapshotSinkError};
pub use coordination::{CasOutcome, CoordinationStore, Guard};
pub use entity::{ConnectionRecord, Lease, Participant, Piece, Session, SessionSnapshot};
pub use error::{BackplaneError, MessagePushError, RejectReason, StoreError, ValidationError};
pub use event::{EventEnvelope, SessionEvent};
pub use keyspace::Keyspace;
pub use message_pusher::{MessagePusher, PusherChannel};
pub use puzzle::{GridSpec, LayoutError, PieceSlot, PuzzleLayout, SnapTolerance};
pub use replica::BoardReplica;
pub use transition::{MoveRequest, Transition};
#[cfg(test)]
pub use backplane::MockBackplane;
#[cfg(test)]
pub use coordination::MockCoordinationStore;
pub use value_object::{
    ConnectionId, DisplayName, HolderToken, MessageContent, NodeId, PieceId, PuzzleId, SessionId,
    Timestamp, UserId,
};
