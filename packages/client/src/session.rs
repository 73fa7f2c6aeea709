//! WebSocket client session management.

use std::{sync::Arc, time::Duration};

use futures_util::{Sink, SinkExt, StreamExt, stream::SplitStream};
use kumitate_server::{
    domain::{BoardReplica, PieceId},
    infrastructure::dto::{
        conversion::snapshot_from_message,
        websocket::{ClientMessage, ServerMessage},
    },
};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use super::{
    command::{Command, HELP},
    domain::is_fatal_join_error,
    error::ClientError,
    formatter::MessageFormatter,
    ui::redisplay_prompt,
};

/// Keeps the connection inside the server's idle timeout
const PING_INTERVAL: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the client joins as
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub session_id: String,
    pub puzzle_id: String,
    pub user_id: String,
    pub display_name: String,
}

/// What the user sees of the session, shared between the reader and the input loop
#[derive(Debug, Default)]
struct ClientView {
    connection_id: Option<String>,
    replica: Option<BoardReplica>,
}

impl ClientView {
    fn me(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Base version and rotation for a move of `piece_id`
    fn move_basis(&self, piece_id: u32) -> (u64, f64) {
        self.replica
            .as_ref()
            .and_then(|replica| replica.piece(PieceId::new(piece_id)))
            .map(|piece| (piece.version, piece.rotation))
            .unwrap_or((0, 0.0))
    }

    /// Fold one server message into the view and render it.
    fn apply(&mut self, message: ServerMessage) -> Option<String> {
        if let ServerMessage::Joined { connection_id, .. } = &message {
            self.connection_id = Some(connection_id.clone());
        }

        if matches!(message, ServerMessage::Snapshot { .. }) {
            return match snapshot_from_message(message) {
                Ok(Some(snapshot)) => {
                    let replica = match self.replica.take() {
                        Some(mut replica) if replica.session_id == snapshot.session_id => {
                            replica.apply_snapshot(snapshot);
                            replica
                        }
                        _ => BoardReplica::from_snapshot(snapshot),
                    };
                    let summary = MessageFormatter::format_board(&replica);
                    self.replica = Some(replica);
                    Some(summary)
                }
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("ignoring invalid snapshot: {}", e);
                    None
                }
            };
        }

        match message.clone().into_event() {
            Ok(Some(event)) => {
                if let Some(replica) = self.replica.as_mut() {
                    replica.apply(&event);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("ignoring invalid event: {}", e),
        }
        MessageFormatter::format_message(&message, self.replica.as_ref(), self.me())
    }
}

/// Run one connection: join, then relay commands until the user quits or the socket drops.
///
/// `input` outlives the session so that a reconnect keeps reading the same terminal.
pub async fn run_client_session(
    options: &ClientOptions,
    input: &mut tokio::sync::mpsc::UnboundedReceiver<String>,
) -> Result<(), ClientError> {
    let (ws_stream, _response) = connect_async(options.url.as_str())
        .await
        .map_err(|e| ClientError::ConnectionError(e.to_string()))?;
    tracing::info!("Connected to {}", options.url);

    let (mut write, read) = ws_stream.split();
    let join = ClientMessage::Join {
        session_id: options.session_id.clone(),
        puzzle_id: options.puzzle_id.clone(),
        user_id: options.user_id.clone(),
        display_name: options.display_name.clone(),
    };
    send(&mut write, &join)
        .await
        .map_err(|e| ClientError::ConnectionError(e.to_string()))?;

    let view = Arc::new(Mutex::new(ClientView::default()));
    let prompt = options.display_name.clone();
    let mut read_task = tokio::spawn(read_loop(read, view.clone(), prompt.clone()));

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    let outcome = loop {
        tokio::select! {
            read_result = &mut read_task => {
                break match read_result {
                    Ok(result) => result,
                    Err(e) => Err(ClientError::ConnectionError(e.to_string())),
                };
            }
            _ = ping.tick() => {
                if send(&mut write, &ClientMessage::Ping).await.is_err() {
                    break Err(lost(&view).await);
                }
            }
            line = input.recv() => {
                let Some(line) = line else {
                    // 入力が閉じた（Ctrl+C / Ctrl+D）
                    let _ = send(&mut write, &ClientMessage::Leave).await;
                    break Ok(());
                };
                let command = match Command::parse(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        println!("{}", e);
                        redisplay_prompt(&prompt);
                        continue;
                    }
                };
                let Some(message) = to_message(command, &view, &prompt).await else {
                    continue;
                };
                let quit = matches!(message, ClientMessage::Leave);
                if send(&mut write, &message).await.is_err() {
                    break Err(lost(&view).await);
                }
                if quit {
                    break Ok(());
                }
            }
        }
    };

    read_task.abort();
    let _ = write.close().await;
    outcome
}

/// Local commands print immediately; the rest become protocol messages.
async fn to_message(
    command: Command,
    view: &Mutex<ClientView>,
    prompt: &str,
) -> Option<ClientMessage> {
    if matches!(command, Command::Who | Command::Pieces | Command::Help) {
        let view = view.lock().await;
        let output = match (command, view.replica.as_ref()) {
            (Command::Help, _) => format!("{}\n", HELP),
            (Command::Who, Some(replica)) => {
                MessageFormatter::format_participants(replica, view.me())
            }
            (Command::Pieces, Some(replica)) => MessageFormatter::format_pieces(replica, view.me()),
            _ => "not joined yet\n".to_string(),
        };
        print!("{}", output);
        redisplay_prompt(prompt);
        return None;
    }

    let message = match command {
        Command::Grab(piece_id) => ClientMessage::Grab { piece_id },
        Command::Move {
            piece_id,
            x,
            y,
            rotation,
        } => {
            let (base_version, current_rotation) = view.lock().await.move_basis(piece_id);
            ClientMessage::Move {
                piece_id,
                x,
                y,
                rotation: rotation.unwrap_or(current_rotation),
                base_version,
            }
        }
        Command::Drop(piece_id) => ClientMessage::Release { piece_id },
        Command::Renew(piece_id) => ClientMessage::Renew { piece_id },
        Command::Chat(text) => ClientMessage::Chat { text },
        Command::Sync => ClientMessage::Resync,
        Command::Quit => ClientMessage::Leave,
        Command::Who | Command::Pieces | Command::Help => return None,
    };
    Some(message)
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    view: Arc<Mutex<ClientView>>,
    prompt: String,
) -> Result<(), ClientError> {
    while let Some(message) = read.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                tracing::info!("Server closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket read error: {}", e);
                break;
            }
        };

        let message = match serde_json::from_str::<ServerMessage>(text.as_str()) {
            Ok(message) => message,
            Err(_) => {
                print!("{}", MessageFormatter::format_raw_message(text.as_str()));
                redisplay_prompt(&prompt);
                continue;
            }
        };

        let mut view = view.lock().await;
        if view.connection_id.is_none()
            && let ServerMessage::Error { code, message } = &message
            && is_fatal_join_error(code)
        {
            return Err(ClientError::Rejected {
                code: code.clone(),
                message: message.clone(),
            });
        }
        if let Some(output) = view.apply(message) {
            print!("{}", output);
            redisplay_prompt(&prompt);
        }
    }
    Err(lost(&view).await)
}

/// Error for a dropped socket: a lost session if the join had completed.
async fn lost(view: &Mutex<ClientView>) -> ClientError {
    if view.lock().await.connection_id.is_some() {
        ClientError::ConnectionLost
    } else {
        ClientError::ConnectionError("connection closed before joining".to_string())
    }
}

async fn send<S>(write: &mut S, message: &ClientMessage) -> Result<(), ClientError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(message)
        .map_err(|e| ClientError::ConnectionError(format!("failed to encode message: {}", e)))?;
    write
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| ClientError::ConnectionError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumitate_server::infrastructure::dto::websocket::{ParticipantDto, PieceDto};

    fn piece(id: u32, version: u64) -> PieceDto {
        PieceDto {
            id,
            puzzle_id: "demo-2x2".to_string(),
            x: 300.0,
            y: 0.0,
            rotation: 90.0,
            is_placed: false,
            version,
        }
    }

    fn snapshot(version: u64) -> ServerMessage {
        ServerMessage::Snapshot {
            session_id: "s1".to_string(),
            puzzle_id: "demo-2x2".to_string(),
            pieces: vec![piece(0, version)],
            participants: vec![ParticipantDto {
                connection_id: "c-a".to_string(),
                user_id: "alice".to_string(),
                session_id: "s1".to_string(),
                display_name: "Alice".to_string(),
                joined_at: 1_000,
            }],
            completed: false,
            taken_at: 2_000,
        }
    }

    #[test]
    fn test_view_tracks_snapshot_and_moves() {
        // テスト項目: スナップショットと移動イベントでレプリカが更新される
        // given (前提条件):
        let mut view = ClientView::default();
        view.apply(snapshot(0));

        // when (操作):
        view.apply(ServerMessage::PieceMoved { piece: piece(0, 3) });

        // then (期待する結果):
        assert_eq!(view.move_basis(0), (3, 90.0));
        assert_eq!(view.move_basis(7), (0, 0.0));
    }

    #[test]
    fn test_view_keeps_newer_piece_over_older_snapshot() {
        // テスト項目: 古いスナップショットで新しいピースの状態が巻き戻らない
        // given (前提条件):
        let mut view = ClientView::default();
        view.apply(snapshot(0));
        view.apply(ServerMessage::PieceMoved { piece: piece(0, 5) });

        // when (操作):
        view.apply(snapshot(4));

        // then (期待する結果):
        assert_eq!(view.move_basis(0).0, 5);
    }

    #[test]
    fn test_view_remembers_own_connection() {
        // テスト項目: joined メッセージで自分の接続 ID を覚える
        // given (前提条件):
        let mut view = ClientView::default();
        let participant = ParticipantDto {
            connection_id: "c-a".to_string(),
            user_id: "alice".to_string(),
            session_id: "s1".to_string(),
            display_name: "Alice".to_string(),
            joined_at: 1_000,
        };

        // when (操作):
        let output = view.apply(ServerMessage::Joined {
            connection_id: "c-a".to_string(),
            participant,
        });

        // then (期待する結果):
        assert_eq!(view.me(), Some("c-a"));
        assert!(output.unwrap().contains("joined as Alice"));
    }
}
