//! Session-scoped domain events.
//!
//! Events are what the backplane carries between nodes and what every node relays to
//! its local connections. Delivery is at-least-once, so applying an event must be
//! idempotent (see [`super::replica`]).

use serde::{Deserialize, Serialize};

use super::{
    entity::{Participant, Piece},
    value_object::{
        ConnectionId, DisplayName, MessageContent, NodeId, PieceId, SessionId, Timestamp, UserId,
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SessionEvent {
    UserJoined {
        participant: Participant,
    },
    UserLeft {
        connection_id: ConnectionId,
        user_id: UserId,
    },
    PieceLocked {
        piece_id: PieceId,
        connection_id: ConnectionId,
    },
    PieceReleased {
        piece_id: PieceId,
    },
    PieceMoved {
        piece: Piece,
    },
    PuzzleCompleted,
    ChatPosted {
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: DisplayName,
        text: MessageContent,
        sent_at: Timestamp,
    },
}

impl SessionEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::UserJoined { .. } => "user-joined",
            SessionEvent::UserLeft { .. } => "user-left",
            SessionEvent::PieceLocked { .. } => "piece-locked",
            SessionEvent::PieceReleased { .. } => "piece-released",
            SessionEvent::PieceMoved { .. } => "piece-moved",
            SessionEvent::PuzzleCompleted => "puzzle-completed",
            SessionEvent::ChatPosted { .. } => "chat-posted",
        }
    }
}

/// What actually travels over the backplane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Node that produced the event; it has already delivered it locally.
    pub origin: NodeId,
    pub session_id: SessionId,
    pub event: SessionEvent,
}
