//! Message formatting utilities for client display.

use chrono::{DateTime, Local};
use kumitate_server::{
    domain::{BoardReplica, PieceId},
    infrastructure::dto::websocket::ServerMessage,
};

const RULE: &str = "============================================================";

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Summary printed after every snapshot
    pub fn format_board(replica: &BoardReplica) -> String {
        let mut output = format!(
            "\n{}\nSession '{}' (puzzle '{}'): {}/{} pieces placed",
            RULE,
            replica.session_id,
            replica.puzzle_id,
            replica.placed_count(),
            replica.piece_count()
        );
        if replica.is_completed() {
            output.push_str(" (completed)");
        }
        output.push('\n');
        output.push_str(&format!(
            "{} participant(s) online. Type 'help' for commands.\n{}\n",
            replica.participants().count(),
            RULE
        ));
        output
    }

    /// Participant list, the current connection marked with "(me)"
    pub fn format_participants(replica: &BoardReplica, me: Option<&str>) -> String {
        let mut output = String::from("\nParticipants:\n");
        let mut participants: Vec<_> = replica.participants().collect();
        participants.sort_by_key(|p| p.joined_at);
        if participants.is_empty() {
            output.push_str("(No participants)\n");
        }
        for participant in participants {
            let me_suffix = if Some(participant.connection_id.as_str()) == me {
                " (me)"
            } else {
                ""
            };
            output.push_str(&format!(
                "{} [{}]{} - joined at {}\n",
                participant.display_name.as_str(),
                participant.user_id,
                me_suffix,
                local_time(participant.joined_at.value())
            ));
        }
        output
    }

    /// One line per piece with position, version and lock state
    pub fn format_pieces(replica: &BoardReplica, me: Option<&str>) -> String {
        let mut output = String::from("\nPieces:\n");
        for piece in replica.pieces() {
            let status = if piece.is_placed {
                "placed".to_string()
            } else {
                match replica.lock_holder(piece.id) {
                    Some(holder) if Some(holder.as_str()) == me => "held by me".to_string(),
                    Some(holder) => format!("held by {}", name_of(replica, holder.as_str())),
                    None => "free".to_string(),
                }
            };
            output.push_str(&format!(
                "#{:<3} ({:>7.1}, {:>7.1}) rot {:>5.1}  v{:<4} {}\n",
                piece.id, piece.x, piece.y, piece.rotation, piece.version, status
            ));
        }
        output
    }

    /// Format a server message; `None` for messages that print nothing.
    ///
    /// `replica` is the board after the message was applied.
    pub fn format_message(
        message: &ServerMessage,
        replica: Option<&BoardReplica>,
        me: Option<&str>,
    ) -> Option<String> {
        let name = |connection_id: &str| match replica {
            Some(replica) => name_of(replica, connection_id),
            None => connection_id.to_string(),
        };
        let line = match message {
            ServerMessage::Snapshot { .. } | ServerMessage::Pong => return None,
            ServerMessage::Joined { participant, .. } => format!(
                "joined as {} ({})",
                participant.display_name, participant.connection_id
            ),
            ServerMessage::LockGranted {
                piece_id,
                expires_in_ms,
            } => format!(
                "holding piece #{} (lease {} ms, renew before it runs out)",
                piece_id, expires_in_ms
            ),
            ServerMessage::LockDenied { piece_id } => {
                format!("piece #{} is held by someone else", piece_id)
            }
            ServerMessage::LockRenewed { piece_id, .. } => {
                format!("lease on piece #{} renewed", piece_id)
            }
            ServerMessage::LockLost { piece_id } => format!("lost the lock on piece #{}", piece_id),
            ServerMessage::MoveAccepted {
                piece_id,
                version,
                is_placed,
                puzzle_completed,
            } => {
                let mut line = format!("moved piece #{} (v{})", piece_id, version);
                if *is_placed {
                    line.push_str(", it snapped into place!");
                }
                if *puzzle_completed {
                    line.push_str(" That was the last piece.");
                }
                line
            }
            ServerMessage::PieceMoved { piece } => {
                // 自分の移動は move-accepted で表示済み
                let mine = replica
                    .zip(me)
                    .and_then(|(replica, me)| {
                        replica
                            .lock_holder(PieceId::new(piece.id))
                            .map(|holder| holder.as_str() == me)
                    })
                    .unwrap_or(false);
                if mine {
                    return None;
                }
                let mut line = format!(
                    "piece #{} moved to ({:.1}, {:.1})",
                    piece.id, piece.x, piece.y
                );
                if piece.is_placed {
                    line.push_str(" and is placed");
                }
                line
            }
            ServerMessage::PieceLocked {
                piece_id,
                connection_id,
            } => {
                if Some(connection_id.as_str()) == me {
                    return None;
                }
                format!("{} picked up piece #{}", name(connection_id), piece_id)
            }
            ServerMessage::PieceReleased { piece_id } => {
                format!("piece #{} was put down", piece_id)
            }
            ServerMessage::UserJoined { participant } => {
                if Some(participant.connection_id.as_str()) == me {
                    return None;
                }
                format!(
                    "+ {} entered at {}",
                    participant.display_name,
                    local_time(participant.joined_at)
                )
            }
            ServerMessage::UserLeft { user_id, .. } => format!("- {} left", user_id),
            ServerMessage::PuzzleCompleted { session_id } => {
                format!("*** Puzzle in session '{}' completed! ***", session_id)
            }
            ServerMessage::Chat {
                connection_id,
                display_name,
                text,
                sent_at,
                ..
            } => {
                let me_suffix = if Some(connection_id.as_str()) == me {
                    " (me)"
                } else {
                    ""
                };
                format!(
                    "[{}] @{}{}: {}",
                    local_time(*sent_at),
                    display_name,
                    me_suffix,
                    text
                )
            }
            ServerMessage::Error { code, message } => format!("error {}: {}", code, message),
        };
        Some(format!("\n{}\n", line))
    }

    /// Format a raw text message (when parsing fails)
    pub fn format_raw_message(text: &str) -> String {
        format!("\n← Received: {}\n", text)
    }
}

fn name_of(replica: &BoardReplica, connection_id: &str) -> String {
    replica
        .participants()
        .find(|p| p.connection_id.as_str() == connection_id)
        .map(|p| p.display_name.as_str().to_string())
        .unwrap_or_else(|| connection_id.to_string())
}

fn local_time(timestamp_millis: i64) -> String {
    match DateTime::from_timestamp_millis(timestamp_millis) {
        Some(time) => time.with_timezone(&Local).format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumitate_server::{
        domain::{
            ConnectionId, DisplayName, Participant, Piece, PuzzleId, SessionId,
            SessionSnapshot, SessionEvent, Timestamp, UserId,
        },
        infrastructure::dto::websocket::ParticipantDto,
    };

    fn participant(connection: &str, name: &str) -> Participant {
        Participant {
            connection_id: ConnectionId::new(connection.to_string()).unwrap(),
            user_id: UserId::new(name.to_lowercase()).unwrap(),
            session_id: SessionId::new("s1".to_string()).unwrap(),
            display_name: DisplayName::new(name.to_string()).unwrap(),
            joined_at: Timestamp::new(1_672_498_800_000),
        }
    }

    fn replica() -> BoardReplica {
        let puzzle_id = PuzzleId::new("demo-2x2".to_string()).unwrap();
        let piece = |id: u32, is_placed: bool| Piece {
            id: PieceId::new(id),
            puzzle_id: puzzle_id.clone(),
            x: 10.0 * f64::from(id),
            y: 0.0,
            rotation: 0.0,
            is_placed,
            version: u64::from(is_placed),
        };
        BoardReplica::from_snapshot(SessionSnapshot {
            session_id: SessionId::new("s1".to_string()).unwrap(),
            puzzle_id: puzzle_id.clone(),
            pieces: vec![piece(0, true), piece(1, false)],
            participants: vec![participant("c-a", "Alice"), participant("c-b", "Bob")],
            completed: false,
            taken_at: Timestamp::new(0),
        })
    }

    #[test]
    fn test_format_board_summary() {
        // テスト項目: スナップショットの要約に配置数と参加者数が含まれる
        // given (前提条件):
        let replica = replica();

        // when (操作):
        let result = MessageFormatter::format_board(&replica);

        // then (期待する結果):
        assert!(result.contains("Session 's1'"));
        assert!(result.contains("1/2 pieces placed"));
        assert!(result.contains("2 participant(s)"));
        assert!(!result.contains("(completed)"));
    }

    #[test]
    fn test_format_participants_marks_me() {
        // テスト項目: 参加者一覧で自分にだけマークが付く
        // given (前提条件):
        let replica = replica();

        // when (操作):
        let result = MessageFormatter::format_participants(&replica, Some("c-a"));

        // then (期待する結果):
        assert!(result.contains("Alice [alice] (me)"));
        assert!(result.contains("Bob [bob] - joined at"));
    }

    #[test]
    fn test_format_pieces_shows_lock_holder() {
        // テスト項目: ピース一覧に配置状態とロック保持者が表示される
        // given (前提条件):
        let mut replica = replica();
        replica.apply(&SessionEvent::PieceLocked {
            piece_id: PieceId::new(1),
            connection_id: ConnectionId::new("c-b".to_string()).unwrap(),
        });

        // when (操作):
        let result = MessageFormatter::format_pieces(&replica, Some("c-a"));

        // then (期待する結果):
        assert!(result.contains("placed"));
        assert!(result.contains("held by Bob"));
    }

    #[test]
    fn test_format_piece_locked_uses_display_name() {
        // テスト項目: 他者のロック通知は表示名で表示される
        // given (前提条件):
        let replica = replica();
        let message = ServerMessage::PieceLocked {
            piece_id: 1,
            connection_id: "c-b".to_string(),
        };

        // when (操作):
        let result = MessageFormatter::format_message(&message, Some(&replica), Some("c-a"));

        // then (期待する結果):
        assert_eq!(result, Some("\nBob picked up piece #1\n".to_string()));
    }

    #[test]
    fn test_format_own_user_joined_is_silent() {
        // テスト項目: 自分自身の参加通知は表示しない
        // given (前提条件):
        let message = ServerMessage::UserJoined {
            participant: ParticipantDto::from(participant("c-a", "Alice")),
        };

        // when (操作):
        let result = MessageFormatter::format_message(&message, None, Some("c-a"));

        // then (期待する結果):
        assert_eq!(result, None);
    }

    #[test]
    fn test_format_error_message() {
        // テスト項目: エラーはコードとメッセージ付きで表示される
        // given (前提条件):
        let message = ServerMessage::error("STALE_VERSION", "move is based on a stale version");

        // when (操作):
        let result = MessageFormatter::format_message(&message, None, None);

        // then (期待する結果):
        let result = result.unwrap();
        assert!(result.contains("STALE_VERSION"));
        assert!(result.contains("stale version"));
    }

    #[test]
    fn test_format_raw_message() {
        // テスト項目: 生メッセージが正しくフォーマットされる
        // given (前提条件):
        let text = "unknown message format";

        // when (操作):
        let result = MessageFormatter::format_raw_message(text);

        // then (期待する結果):
        assert!(result.contains("unknown message format"));
        assert!(result.contains("Received:"));
    }
}
