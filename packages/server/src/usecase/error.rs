//! UseCase 層のエラー定義
//!
//! 各エラーはクライアントへ返すエラーコード（`code()`）を持ちます。

use thiserror::Error;

use crate::domain::{MessagePushError, RejectReason, StoreError, ValidationError};

pub const CODE_UNKNOWN_PUZZLE: &str = "UNKNOWN_PUZZLE";
pub const CODE_NOT_JOINED: &str = "NOT_JOINED";
pub const CODE_ALREADY_JOINED: &str = "ALREADY_JOINED";
pub const CODE_INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const CODE_STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";

/// 参加処理のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("unknown puzzle '{0}'")]
    UnknownPuzzle(String),

    /// セッションは既に別のパズルで作成されている
    #[error("session '{session_id}' is already playing puzzle '{puzzle_id}'")]
    PuzzleMismatch {
        session_id: String,
        puzzle_id: String,
    },

    #[error("connection has already joined a session")]
    AlreadyJoined,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JoinError {
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::UnknownPuzzle(_) => CODE_UNKNOWN_PUZZLE,
            JoinError::PuzzleMismatch { .. } => CODE_INVALID_REQUEST,
            JoinError::AlreadyJoined => CODE_ALREADY_JOINED,
            JoinError::Store(_) => CODE_STORE_UNAVAILABLE,
        }
    }
}

/// ロック操作（取得・解放・延長）のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),

    #[error("connection is not part of a session")]
    NotJoined,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LockError {
    pub fn code(&self) -> &'static str {
        match self {
            LockError::Rejected(reason) => reason.code(),
            LockError::NotJoined => CODE_NOT_JOINED,
            LockError::Store(_) => CODE_STORE_UNAVAILABLE,
        }
    }
}

/// 移動処理のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MoveError {
    pub fn code(&self) -> &'static str {
        match self {
            MoveError::Rejected(reason) => reason.code(),
            MoveError::Store(_) => CODE_STORE_UNAVAILABLE,
        }
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            MoveError::Rejected(reason) => Some(*reason),
            MoveError::Store(_) => None,
        }
    }
}

/// チャット送信のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("connection is not part of a session")]
    NotJoined,

    #[error("invalid message: {0}")]
    InvalidMessage(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::NotJoined => CODE_NOT_JOINED,
            ChatError::InvalidMessage(_) => CODE_INVALID_REQUEST,
            ChatError::Store(_) => CODE_STORE_UNAVAILABLE,
        }
    }
}

/// セッション詳細取得のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GetSessionDetailError {
    #[error("session not found")]
    SessionNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GetSessionDetailError {
    pub fn code(&self) -> &'static str {
        match self {
            GetSessionDetailError::SessionNotFound => CODE_INVALID_REQUEST,
            GetSessionDetailError::Store(_) => CODE_STORE_UNAVAILABLE,
        }
    }
}

/// 再同期のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResyncError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Push(#[from] MessagePushError),
}

impl ResyncError {
    pub fn code(&self) -> &'static str {
        match self {
            ResyncError::SessionNotFound(_) | ResyncError::Push(_) => CODE_NOT_JOINED,
            ResyncError::Store(_) => CODE_STORE_UNAVAILABLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        // テスト項目: 各エラーが対応するワイヤーコードを返す
        // given (前提条件):
        let store = StoreError::Unavailable("down".to_string());

        // when (操作) / then (期待する結果):
        assert_eq!(JoinError::UnknownPuzzle("p".to_string()).code(), "UNKNOWN_PUZZLE");
        assert_eq!(JoinError::AlreadyJoined.code(), "ALREADY_JOINED");
        assert_eq!(LockError::from(RejectReason::LockContention).code(), "LOCK_CONTENTION");
        assert_eq!(LockError::NotJoined.code(), "NOT_JOINED");
        assert_eq!(MoveError::from(RejectReason::StaleVersion).code(), "STALE_VERSION");
        assert_eq!(MoveError::from(store.clone()).code(), "STORE_UNAVAILABLE");
        assert_eq!(
            ChatError::from(ValidationError::Empty("message")).code(),
            "INVALID_REQUEST"
        );
        assert_eq!(ChatError::from(store).code(), "STORE_UNAVAILABLE");
    }
}
