//! UseCase: セッション詳細取得処理

use std::sync::Arc;

use crate::domain::{SessionId, SessionSnapshot, Timestamp};

use super::{error::GetSessionDetailError, session_manager::SessionManager};

/// HTTP API に返すセッションの詳細
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDetail {
    pub created_at: Timestamp,
    pub snapshot: SessionSnapshot,
}

/// セッション詳細取得のユースケース
pub struct GetSessionDetailUseCase {
    sessions: Arc<SessionManager>,
}

impl GetSessionDetailUseCase {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    pub async fn execute(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionDetail, GetSessionDetailError> {
        let session = self
            .sessions
            .session(session_id)
            .await?
            .ok_or(GetSessionDetailError::SessionNotFound)?;
        let snapshot = self
            .sessions
            .snapshot(session_id)
            .await?
            .ok_or(GetSessionDetailError::SessionNotFound)?;
        Ok(SessionDetail {
            created_at: session.created_at,
            snapshot,
        })
    }
}
