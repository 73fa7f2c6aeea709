//! WebSocket message DTOs.
//!
//! Every frame is a JSON object tagged by `"type"` (kebab-case).

use serde::{Deserialize, Serialize};

/// Client → server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join {
        session_id: String,
        puzzle_id: String,
        user_id: String,
        display_name: String,
    },
    /// Acquire the piece lock
    Grab {
        piece_id: u32,
    },
    Move {
        piece_id: u32,
        x: f64,
        y: f64,
        rotation: f64,
        base_version: u64,
    },
    Release {
        piece_id: u32,
    },
    Renew {
        piece_id: u32,
    },
    Leave,
    Chat {
        text: String,
    },
    /// Ask for a fresh snapshot
    Resync,
    Ping,
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Snapshot {
        session_id: String,
        puzzle_id: String,
        pieces: Vec<PieceDto>,
        participants: Vec<ParticipantDto>,
        completed: bool,
        taken_at: i64,
    },
    Joined {
        connection_id: String,
        participant: ParticipantDto,
    },
    LockGranted {
        piece_id: u32,
        expires_in_ms: u64,
    },
    LockDenied {
        piece_id: u32,
    },
    LockRenewed {
        piece_id: u32,
        expires_in_ms: u64,
    },
    /// The lease expired or was taken over; abandon the gesture
    LockLost {
        piece_id: u32,
    },
    MoveAccepted {
        piece_id: u32,
        version: u64,
        is_placed: bool,
        puzzle_completed: bool,
    },
    PieceMoved {
        piece: PieceDto,
    },
    PieceLocked {
        piece_id: u32,
        connection_id: String,
    },
    PieceReleased {
        piece_id: u32,
    },
    UserJoined {
        participant: ParticipantDto,
    },
    UserLeft {
        connection_id: String,
        user_id: String,
    },
    PuzzleCompleted {
        session_id: String,
    },
    Chat {
        connection_id: String,
        user_id: String,
        display_name: String,
        text: String,
        sent_at: i64,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Serialize for the wire; logs and returns `None` on failure.
    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!("failed to serialize server message: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceDto {
    pub id: u32,
    pub puzzle_id: String,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub is_placed: bool,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDto {
    pub connection_id: String,
    pub user_id: String,
    pub session_id: String,
    pub display_name: String,
    pub joined_at: i64,
}
