//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use kumitate_shared::time::timestamp_to_rfc3339;

use crate::{
    domain::SessionId,
    infrastructure::dto::http::{HealthDto, ParticipantDetailDto, SessionDetailDto},
    ui::state::AppState,
    usecase::GetSessionDetailError,
};

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok".to_string(),
        node_id: state.node_id.as_str().to_string(),
    })
}

/// Get session detail by ID
pub async fn get_session_detail(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetailDto>, StatusCode> {
    let session_id = match SessionId::new(session_id) {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!("invalid session id: {}", e);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    match state.session_detail.execute(&session_id).await {
        Ok(detail) => {
            let snapshot = detail.snapshot;
            // Domain Model から DTO への変換
            let session_detail = SessionDetailDto {
                session_id: snapshot.session_id.as_str().to_string(),
                puzzle_id: snapshot.puzzle_id.as_str().to_string(),
                created_at: timestamp_to_rfc3339(detail.created_at.value()),
                placed_pieces: snapshot.placed_count(),
                total_pieces: snapshot.pieces.len(),
                completed: snapshot.completed,
                participants: snapshot
                    .participants
                    .into_iter()
                    .map(|p| ParticipantDetailDto {
                        connection_id: p.connection_id.into_string(),
                        user_id: p.user_id.into_string(),
                        display_name: p.display_name.as_str().to_string(),
                        joined_at: timestamp_to_rfc3339(p.joined_at.value()),
                    })
                    .collect(),
            };
            Ok(Json(session_detail))
        }
        Err(GetSessionDetailError::SessionNotFound) => Err(StatusCode::NOT_FOUND),
        Err(GetSessionDetailError::Store(e)) => {
            tracing::warn!(session_id = %session_id, "session detail unavailable: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
