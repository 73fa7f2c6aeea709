//! HTTP API response DTOs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDto {
    pub status: String,
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDetailDto {
    pub connection_id: String,
    pub user_id: String,
    pub display_name: String,
    /// RFC 3339 (UTC)
    pub joined_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDetailDto {
    pub session_id: String,
    pub puzzle_id: String,
    /// RFC 3339 (UTC)
    pub created_at: String,
    pub participants: Vec<ParticipantDetailDto>,
    pub placed_pieces: usize,
    pub total_pieces: usize,
    pub completed: bool,
}
