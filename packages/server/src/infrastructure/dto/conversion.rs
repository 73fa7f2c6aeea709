//! Conversion logic between DTOs and domain entities.

use crate::domain::{
    ConnectionId, DisplayName, MessageContent, Participant, Piece, PieceId, PuzzleId,
    SessionEvent, SessionId, SessionSnapshot, Timestamp, UserId, ValidationError,
};
use crate::infrastructure::dto::websocket::{ParticipantDto, PieceDto, ServerMessage};

// ========================================
// Domain Entity → DTO
// ========================================

impl From<Piece> for PieceDto {
    fn from(model: Piece) -> Self {
        Self {
            id: model.id.value(),
            puzzle_id: model.puzzle_id.into_string(),
            x: model.x,
            y: model.y,
            rotation: model.rotation,
            is_placed: model.is_placed,
            version: model.version,
        }
    }
}

impl From<Participant> for ParticipantDto {
    fn from(model: Participant) -> Self {
        Self {
            connection_id: model.connection_id.into_string(),
            user_id: model.user_id.into_string(),
            session_id: model.session_id.into_string(),
            display_name: model.display_name.into(),
            joined_at: model.joined_at.value(),
        }
    }
}

impl From<SessionSnapshot> for ServerMessage {
    fn from(model: SessionSnapshot) -> Self {
        ServerMessage::Snapshot {
            session_id: model.session_id.into_string(),
            puzzle_id: model.puzzle_id.into_string(),
            pieces: model.pieces.into_iter().map(PieceDto::from).collect(),
            participants: model
                .participants
                .into_iter()
                .map(ParticipantDto::from)
                .collect(),
            completed: model.completed,
            taken_at: model.taken_at.value(),
        }
    }
}

impl ServerMessage {
    /// Wire form of a relayed session event
    pub fn from_event(session_id: &SessionId, event: SessionEvent) -> Self {
        match event {
            SessionEvent::UserJoined { participant } => ServerMessage::UserJoined {
                participant: participant.into(),
            },
            SessionEvent::UserLeft {
                connection_id,
                user_id,
            } => ServerMessage::UserLeft {
                connection_id: connection_id.into_string(),
                user_id: user_id.into_string(),
            },
            SessionEvent::PieceLocked {
                piece_id,
                connection_id,
            } => ServerMessage::PieceLocked {
                piece_id: piece_id.value(),
                connection_id: connection_id.into_string(),
            },
            SessionEvent::PieceReleased { piece_id } => ServerMessage::PieceReleased {
                piece_id: piece_id.value(),
            },
            SessionEvent::PieceMoved { piece } => ServerMessage::PieceMoved {
                piece: piece.into(),
            },
            SessionEvent::PuzzleCompleted => ServerMessage::PuzzleCompleted {
                session_id: session_id.as_str().to_string(),
            },
            SessionEvent::ChatPosted {
                connection_id,
                user_id,
                display_name,
                text,
                sent_at,
            } => ServerMessage::Chat {
                connection_id: connection_id.into_string(),
                user_id: user_id.into_string(),
                display_name: display_name.into(),
                text: text.into_string(),
                sent_at: sent_at.value(),
            },
        }
    }

    /// Domain event carried by this message, if it is a relayed event.
    pub fn into_event(self) -> Result<Option<SessionEvent>, ValidationError> {
        let event = match self {
            ServerMessage::UserJoined { participant } => SessionEvent::UserJoined {
                participant: participant.try_into()?,
            },
            ServerMessage::UserLeft {
                connection_id,
                user_id,
            } => SessionEvent::UserLeft {
                connection_id: ConnectionId::new(connection_id)?,
                user_id: UserId::new(user_id)?,
            },
            ServerMessage::PieceLocked {
                piece_id,
                connection_id,
            } => SessionEvent::PieceLocked {
                piece_id: PieceId::new(piece_id),
                connection_id: ConnectionId::new(connection_id)?,
            },
            ServerMessage::PieceReleased { piece_id } => SessionEvent::PieceReleased {
                piece_id: PieceId::new(piece_id),
            },
            ServerMessage::PieceMoved { piece } => SessionEvent::PieceMoved {
                piece: piece.try_into()?,
            },
            ServerMessage::PuzzleCompleted { .. } => SessionEvent::PuzzleCompleted,
            ServerMessage::Chat {
                connection_id,
                user_id,
                display_name,
                text,
                sent_at,
            } => SessionEvent::ChatPosted {
                connection_id: ConnectionId::new(connection_id)?,
                user_id: UserId::new(user_id)?,
                display_name: DisplayName::new(display_name)?,
                text: MessageContent::new(text)?,
                sent_at: Timestamp::new(sent_at),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

// ========================================
// DTO → Domain Entity
// ========================================

impl TryFrom<PieceDto> for Piece {
    type Error = ValidationError;

    fn try_from(dto: PieceDto) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PieceId::new(dto.id),
            puzzle_id: PuzzleId::new(dto.puzzle_id)?,
            x: dto.x,
            y: dto.y,
            rotation: dto.rotation,
            is_placed: dto.is_placed,
            version: dto.version,
        })
    }
}

impl TryFrom<ParticipantDto> for Participant {
    type Error = ValidationError;

    fn try_from(dto: ParticipantDto) -> Result<Self, Self::Error> {
        Ok(Self {
            connection_id: ConnectionId::new(dto.connection_id)?,
            user_id: UserId::new(dto.user_id)?,
            session_id: SessionId::new(dto.session_id)?,
            display_name: DisplayName::new(dto.display_name)?,
            joined_at: Timestamp::new(dto.joined_at),
        })
    }
}

/// Rebuild a snapshot from a `snapshot` message; `None` for any other message.
pub fn snapshot_from_message(
    message: ServerMessage,
) -> Result<Option<SessionSnapshot>, ValidationError> {
    let ServerMessage::Snapshot {
        session_id,
        puzzle_id,
        pieces,
        participants,
        completed,
        taken_at,
    } = message
    else {
        return Ok(None);
    };
    Ok(Some(SessionSnapshot {
        session_id: SessionId::new(session_id)?,
        puzzle_id: PuzzleId::new(puzzle_id)?,
        pieces: pieces
            .into_iter()
            .map(Piece::try_from)
            .collect::<Result<_, _>>()?,
        participants: participants
            .into_iter()
            .map(Participant::try_from)
            .collect::<Result<_, _>>()?,
        completed,
        taken_at: Timestamp::new(taken_at),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant() -> Participant {
        Participant {
            connection_id: ConnectionId::new("c1".to_string()).unwrap(),
            user_id: UserId::new("alice".to_string()).unwrap(),
            session_id: SessionId::new("s1".to_string()).unwrap(),
            display_name: DisplayName::new("Alice".to_string()).unwrap(),
            joined_at: Timestamp::new(1_000),
        }
    }

    #[test]
    fn test_completion_event_carries_session_id_on_the_wire() {
        // テスト項目: 完成イベントはセッション ID 付きのメッセージになる
        // given (前提条件):
        let session_id = SessionId::new("s1".to_string()).unwrap();

        // when (操作):
        let message = ServerMessage::from_event(&session_id, SessionEvent::PuzzleCompleted);

        // then (期待する結果):
        assert_eq!(
            message,
            ServerMessage::PuzzleCompleted {
                session_id: "s1".to_string()
            }
        );
    }

    #[test]
    fn test_relayed_event_converts_back_to_domain() {
        // テスト項目: クライアント側で中継メッセージをドメインイベントに戻せる
        // given (前提条件):
        let session_id = SessionId::new("s1".to_string()).unwrap();
        let event = SessionEvent::UserJoined {
            participant: participant(),
        };

        // when (操作):
        let message = ServerMessage::from_event(&session_id, event.clone());
        let restored = message.into_event().unwrap();

        // then (期待する結果):
        assert_eq!(restored, Some(event));
    }

    #[test]
    fn test_non_event_messages_have_no_domain_event() {
        // テスト項目: 応答メッセージ（pong など）はドメインイベントにならない
        // given (前提条件):
        let message = ServerMessage::LockDenied { piece_id: 1 };

        // when (操作):
        let restored = message.into_event().unwrap();

        // then (期待する結果):
        assert_eq!(restored, None);
    }

    #[test]
    fn test_invalid_identifier_in_dto_is_rejected() {
        // テスト項目: DTO の不正な ID はドメイン変換時にエラーになる
        // given (前提条件):
        let dto = ParticipantDto {
            connection_id: "bad id".to_string(),
            ..ParticipantDto::from(participant())
        };

        // when (操作):
        let result = Participant::try_from(dto);

        // then (期待する結果):
        assert!(matches!(result, Err(ValidationError::InvalidCharacters(_))));
    }
}
