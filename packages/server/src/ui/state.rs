//! Shared application state.

use std::{sync::Arc, time::Duration};

use crate::{
    domain::NodeId,
    node::SyncNode,
    usecase::{
        GetSessionDetailUseCase, PieceStateManager, ResyncUseCase, SendChatUseCase,
        SessionManager,
    },
};

/// Shared application state
pub struct AppState {
    pub node_id: NodeId,
    /// Lease length reported to clients with `lock-granted`
    pub lock_ttl: Duration,
    /// A socket that sends nothing for this long is closed
    pub client_idle_timeout: Duration,
    /// SessionManager（参加・退出）
    pub sessions: Arc<SessionManager>,
    /// PieceStateManager（ロックと移動）
    pub pieces: Arc<PieceStateManager>,
    pub chat: Arc<SendChatUseCase>,
    pub resync: Arc<ResyncUseCase>,
    pub session_detail: Arc<GetSessionDetailUseCase>,
}

impl AppState {
    pub fn from_node(node: &SyncNode) -> Self {
        Self {
            node_id: node.node_id.clone(),
            lock_ttl: node.config.lock_ttl,
            client_idle_timeout: node.config.client_idle_timeout,
            sessions: node.sessions.clone(),
            pieces: node.pieces.clone(),
            chat: node.chat.clone(),
            resync: node.resync.clone(),
            session_detail: node.session_detail.clone(),
        }
    }
}
