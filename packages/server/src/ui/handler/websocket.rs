//! WebSocket connection handlers.
//!
//! One socket is one connection. The connection joins at most one session; every
//! request after `join` runs against the record returned by the join.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use kumitate_shared::time::duration_to_millis;
use tokio::sync::{mpsc, watch};

use crate::{
    domain::{
        ConnectionId, ConnectionRecord, DisplayName, HolderToken, MoveRequest, PieceId,
        PuzzleId, RejectReason, SessionId, UserId, ValidationError,
    },
    infrastructure::dto::websocket::{ClientMessage, ServerMessage},
    ui::state::AppState,
    usecase::{
        JoinRequest, LockError,
        error::{
            CODE_ALREADY_JOINED, CODE_INVALID_REQUEST, CODE_NOT_JOINED, CODE_STORE_UNAVAILABLE,
        },
    },
};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let connection_id = ConnectionId::generate();
    tracing::debug!(connection_id = %connection_id, "websocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, connection_id))
}

/// Spawns a task that receives messages from the rx channel and pushes them to the WebSocket sender.
///
/// Both direct replies and session events (via the message pusher) flow through `rx`.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, connection_id: ConnectionId) {
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let (joined_tx, joined_rx) = watch::channel::<Option<SessionId>>(None);
    tracing::info!(connection_id = %connection_id, "client connected");

    let mut push_task = pusher_loop(rx, sender);

    let recv_state = state.clone();
    let mut connection = ClientConnection::new(connection_id.clone(), tx, joined_tx);
    let mut recv_task = tokio::spawn(async move {
        let idle_timeout = recv_state.client_idle_timeout;
        loop {
            let msg = match tokio::time::timeout(idle_timeout, receiver.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    tracing::debug!(
                        connection_id = %connection.connection_id,
                        "websocket error: {}",
                        e
                    );
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::info!(
                        connection_id = %connection.connection_id,
                        "closing idle connection"
                    );
                    break;
                }
            };

            match msg {
                Message::Text(text) => connection.handle_text(&recv_state, text.as_str()).await,
                Message::Close(_) => break,
                // ping / pong はフレームレベルで axum が処理する
                _ => {}
            }
        }
    });

    // いずれかのタスクが終了したら、もう一方も終了させる
    tokio::select! {
        _ = &mut push_task => recv_task.abort(),
        _ = &mut recv_task => push_task.abort(),
    }

    // 切断時の後始末（退出処理と、このノードのローカル配信からの除去）
    match state.sessions.leave(&connection_id).await {
        Ok(Some(record)) => {
            tracing::debug!(session_id = %record.session_id, "left on disconnect");
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(
            connection_id = %connection_id,
            "failed to leave on disconnect, the reaper will clean up: {}",
            e
        ),
    }
    let joined_session = joined_rx.borrow().clone();
    if let Some(session_id) = joined_session {
        state.sessions.detach_local(&connection_id, &session_id).await;
    }
    tracing::info!(connection_id = %connection_id, "client disconnected");
}

/// Per-socket state: the join record and the holder tokens of locks this socket owns
struct ClientConnection {
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
    record: Option<ConnectionRecord>,
    holders: HashMap<PieceId, HolderToken>,
    /// Session whose local delivery must be torn down on disconnect
    joined: watch::Sender<Option<SessionId>>,
}

impl ClientConnection {
    fn new(
        connection_id: ConnectionId,
        tx: mpsc::UnboundedSender<String>,
        joined: watch::Sender<Option<SessionId>>,
    ) -> Self {
        Self {
            connection_id,
            tx,
            record: None,
            holders: HashMap::new(),
            joined,
        }
    }

    fn reply(&self, message: ServerMessage) {
        if let Some(json) = message.to_json() {
            // 受信側が閉じている場合は切断処理に任せる
            let _ = self.tx.send(json);
        }
    }

    fn reply_error(&self, code: &str, message: impl Into<String>) {
        self.reply(ServerMessage::error(code, message));
    }

    fn record(&self) -> Option<ConnectionRecord> {
        let record = self.record.clone();
        if record.is_none() {
            self.reply_error(CODE_NOT_JOINED, "join a session first");
        }
        record
    }

    async fn handle_text(&mut self, state: &AppState, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(connection_id = %self.connection_id, "malformed frame: {}", e);
                self.reply_error(CODE_INVALID_REQUEST, format!("malformed message: {}", e));
                return;
            }
        };
        tracing::debug!(connection_id = %self.connection_id, ?message, "received");

        match message {
            ClientMessage::Join {
                session_id,
                puzzle_id,
                user_id,
                display_name,
            } => {
                self.join(state, session_id, puzzle_id, user_id, display_name)
                    .await
            }
            ClientMessage::Grab { piece_id } => self.grab(state, PieceId::new(piece_id)).await,
            ClientMessage::Move {
                piece_id,
                x,
                y,
                rotation,
                base_version,
            } => {
                let request = MoveRequest {
                    piece_id: PieceId::new(piece_id),
                    x,
                    y,
                    rotation,
                    base_version,
                };
                self.try_move(state, request).await
            }
            ClientMessage::Release { piece_id } => {
                self.release(state, PieceId::new(piece_id)).await
            }
            ClientMessage::Renew { piece_id } => self.renew(state, PieceId::new(piece_id)).await,
            ClientMessage::Leave => self.leave(state).await,
            ClientMessage::Chat { text } => {
                if let Err(e) = state.chat.execute(&self.connection_id, text).await {
                    self.reply_error(e.code(), e.to_string());
                }
            }
            ClientMessage::Resync => {
                let Some(record) = self.record() else { return };
                if let Err(e) = state
                    .resync
                    .execute(&self.connection_id, &record.session_id)
                    .await
                {
                    self.reply_error(e.code(), e.to_string());
                }
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong),
        }
    }

    async fn join(
        &mut self,
        state: &AppState,
        session_id: String,
        puzzle_id: String,
        user_id: String,
        display_name: String,
    ) {
        if self.record.is_some() {
            self.reply_error(CODE_ALREADY_JOINED, "connection has already joined a session");
            return;
        }
        let request = match parse_join(&self.connection_id, session_id, puzzle_id, user_id, display_name)
        {
            Ok(request) => request,
            Err(e) => {
                self.reply_error(CODE_INVALID_REQUEST, e.to_string());
                return;
            }
        };

        match state.sessions.join(request, self.tx.clone()).await {
            Ok(outcome) => {
                self.joined
                    .send_replace(Some(outcome.record.session_id.clone()));
                self.record = Some(outcome.record);
                self.reply(ServerMessage::Joined {
                    connection_id: self.connection_id.as_str().to_string(),
                    participant: outcome.participant.into(),
                });
                self.reply(outcome.snapshot.into());
            }
            Err(e) => {
                tracing::info!(connection_id = %self.connection_id, "join rejected: {}", e);
                self.reply_error(e.code(), e.to_string());
            }
        }
    }

    async fn grab(&mut self, state: &AppState, piece_id: PieceId) {
        let Some(record) = self.record() else { return };

        // 保持中のピースを掴み直した場合は延長として扱う
        let result = match self.holders.get(&piece_id) {
            Some(holder) => state.pieces.renew(&record, piece_id, holder).await,
            None => state.pieces.grab(&record, piece_id).await,
        };
        match result {
            Ok(lease) => {
                self.holders.insert(piece_id, lease.holder);
                self.reply(ServerMessage::LockGranted {
                    piece_id: piece_id.value(),
                    expires_in_ms: lock_ttl_millis(state),
                });
            }
            Err(LockError::Rejected(RejectReason::LockContention)) => {
                self.reply(ServerMessage::LockDenied {
                    piece_id: piece_id.value(),
                });
            }
            Err(LockError::Rejected(RejectReason::LockNotHeld)) => {
                self.holders.remove(&piece_id);
                self.reply(ServerMessage::LockLost {
                    piece_id: piece_id.value(),
                });
            }
            Err(e) => self.reply_error(e.code(), e.to_string()),
        }
    }

    async fn try_move(&mut self, state: &AppState, request: MoveRequest) {
        let Some(record) = self.record() else { return };
        let piece_id = request.piece_id;
        if !(request.x.is_finite() && request.y.is_finite() && request.rotation.is_finite()) {
            self.reply_error(CODE_INVALID_REQUEST, "coordinates must be finite numbers");
            return;
        }

        let holder = self.holders.get(&piece_id).cloned();
        match state
            .pieces
            .try_move(&record, holder.as_ref(), request)
            .await
        {
            Ok(outcome) => {
                if outcome.is_placed {
                    // 配置済みのピースのロックはサーバー側で解放済み
                    self.holders.remove(&piece_id);
                }
                self.reply(ServerMessage::MoveAccepted {
                    piece_id: piece_id.value(),
                    version: outcome.piece.version,
                    is_placed: outcome.is_placed,
                    puzzle_completed: outcome.puzzle_completed,
                });
            }
            Err(e) => {
                let lost = matches!(
                    e.reason(),
                    Some(RejectReason::LockNotHeld | RejectReason::LockContention)
                ) && self.holders.remove(&piece_id).is_some();
                if lost {
                    self.reply(ServerMessage::LockLost {
                        piece_id: piece_id.value(),
                    });
                }
                self.reply_error(e.code(), e.to_string());
            }
        }
    }

    async fn release(&mut self, state: &AppState, piece_id: PieceId) {
        let Some(record) = self.record() else { return };
        let Some(holder) = self.holders.remove(&piece_id) else {
            let reason = RejectReason::LockNotHeld;
            self.reply_error(reason.code(), reason.to_string());
            return;
        };
        match state.pieces.release(&record, piece_id, &holder).await {
            Ok(true) => {}
            Ok(false) => self.reply(ServerMessage::LockLost {
                piece_id: piece_id.value(),
            }),
            Err(e) => self.reply_error(e.code(), e.to_string()),
        }
    }

    async fn renew(&mut self, state: &AppState, piece_id: PieceId) {
        let Some(record) = self.record() else { return };
        let Some(holder) = self.holders.get(&piece_id).cloned() else {
            let reason = RejectReason::LockNotHeld;
            self.reply_error(reason.code(), reason.to_string());
            return;
        };
        match state.pieces.renew(&record, piece_id, &holder).await {
            Ok(_) => self.reply(ServerMessage::LockRenewed {
                piece_id: piece_id.value(),
                expires_in_ms: lock_ttl_millis(state),
            }),
            Err(LockError::Rejected(RejectReason::LockNotHeld)) => {
                self.holders.remove(&piece_id);
                self.reply(ServerMessage::LockLost {
                    piece_id: piece_id.value(),
                });
            }
            Err(e) => self.reply_error(e.code(), e.to_string()),
        }
    }

    async fn leave(&mut self, state: &AppState) {
        if self.record.take().is_none() {
            self.reply_error(CODE_NOT_JOINED, "join a session first");
            return;
        }
        self.holders.clear();
        match state.sessions.leave(&self.connection_id).await {
            Ok(_) => {
                self.joined.send_replace(None);
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, "leave failed: {}", e);
                self.reply_error(CODE_STORE_UNAVAILABLE, e.to_string());
            }
        }
    }
}

fn parse_join(
    connection_id: &ConnectionId,
    session_id: String,
    puzzle_id: String,
    user_id: String,
    display_name: String,
) -> Result<JoinRequest, ValidationError> {
    Ok(JoinRequest {
        connection_id: connection_id.clone(),
        session_id: SessionId::new(session_id)?,
        puzzle_id: PuzzleId::new(puzzle_id)?,
        user_id: UserId::new(user_id)?,
        display_name: DisplayName::new(display_name)?,
    })
}

fn lock_ttl_millis(state: &AppState) -> u64 {
    u64::try_from(duration_to_millis(state.lock_ttl)).unwrap_or(u64::MAX)
}
