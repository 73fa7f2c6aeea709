//! Domain error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value object validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{kind} must be at most {max} characters")]
    TooLong { kind: &'static str, max: usize },

    #[error("{0} contains invalid characters")]
    InvalidCharacters(&'static str),
}

/// Coordination store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store cannot be reached; new lock/move operations on this node stall.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("corrupt value at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Broadcast backplane errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackplaneError {
    #[error("backplane unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// Local message push errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagePushError {
    #[error("connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("push failed: {0}")]
    PushFailed(String),
}

/// Expected, user-visible reasons for rejecting a lock or move request.
///
/// These are routine outcomes, not failures of the node, and are never retried by the
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Another connection holds the piece.
    #[error("piece is locked by someone else")]
    LockContention,

    /// The caller does not hold a lock (never acquired, released or expired).
    #[error("piece lock is not held")]
    LockNotHeld,

    /// The move was based on an outdated version; the client must re-sync.
    #[error("move is based on a stale version")]
    StaleVersion,

    /// The piece is already in its target slot.
    #[error("piece is already placed")]
    AlreadyPlaced,

    #[error("unknown piece")]
    UnknownPiece,
}

impl RejectReason {
    /// Wire-level reason code
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::LockContention => "LOCK_CONTENTION",
            RejectReason::LockNotHeld => "LOCK_NOT_HELD",
            RejectReason::StaleVersion => "STALE_VERSION",
            RejectReason::AlreadyPlaced => "ALREADY_PLACED",
            RejectReason::UnknownPiece => "UNKNOWN_PIECE",
        }
    }
}
