//! Command dispatch as pure functions.
//!
//! One function per operation: it takes the current state and the input and returns
//! the next state plus the events to broadcast. No I/O, no clock, no transport, so the
//! same input yields the same outcome on every node. The usecase layer reads state from
//! the coordination store, calls these functions and writes the result back.

use super::{
    entity::{ConnectionRecord, Participant, Piece, Session},
    error::RejectReason,
    event::SessionEvent,
    puzzle::{PieceSlot, SnapTolerance, is_puzzle_complete, normalize_angle},
    value_object::PieceId,
};

/// Next state plus outbound events.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S> {
    pub state: S,
    pub events: Vec<SessionEvent>,
}

/// A move as requested by the lock holder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequest {
    pub piece_id: PieceId,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub base_version: u64,
}

/// Apply a move to a piece (lock ownership is checked by the caller).
///
/// Placed pieces are terminal. A stale `base_version` is rejected without touching the
/// state. A move within snap tolerance lands exactly on the target slot.
pub fn try_move(
    current: &Piece,
    slot: &PieceSlot,
    snap: &SnapTolerance,
    request: &MoveRequest,
) -> Result<Transition<Piece>, RejectReason> {
    if current.id != request.piece_id || slot.id != request.piece_id {
        return Err(RejectReason::UnknownPiece);
    }
    if current.is_placed {
        return Err(RejectReason::AlreadyPlaced);
    }
    if request.base_version != current.version {
        return Err(RejectReason::StaleVersion);
    }

    let placed = snap.accepts(slot, request.x, request.y, request.rotation);
    let next = if placed {
        Piece {
            x: slot.target_x,
            y: slot.target_y,
            rotation: normalize_angle(slot.target_rotation),
            is_placed: true,
            version: current.version + 1,
            ..current.clone()
        }
    } else {
        Piece {
            x: request.x,
            y: request.y,
            rotation: normalize_angle(request.rotation),
            is_placed: false,
            version: current.version + 1,
            ..current.clone()
        }
    };

    Ok(Transition {
        events: vec![SessionEvent::PieceMoved {
            piece: next.clone(),
        }],
        state: next,
    })
}

/// Add a participant to a session.
///
/// Joining with a connection that is already a member changes nothing and emits nothing.
pub fn join(session: &Session, participant: Participant) -> Transition<Session> {
    let mut next = session.clone();
    if !next
        .participant_ids
        .insert(participant.connection_id.clone())
    {
        return Transition {
            state: next,
            events: Vec::new(),
        };
    }
    Transition {
        state: next,
        events: vec![SessionEvent::UserJoined { participant }],
    }
}

/// Remove a connection from a session after its locks were released.
///
/// Emits one `PieceReleased` per released lock, then `UserLeft`.
pub fn leave(
    session: &Session,
    record: &ConnectionRecord,
    released: &[PieceId],
) -> Transition<Session> {
    let mut next = session.clone();
    next.participant_ids.remove(&record.connection_id);

    Transition {
        state: next,
        events: departure_events(record, released),
    }
}

/// Events announcing a departure: one `PieceReleased` per released lock, then `UserLeft`.
pub fn departure_events(record: &ConnectionRecord, released: &[PieceId]) -> Vec<SessionEvent> {
    let mut events: Vec<SessionEvent> = released
        .iter()
        .map(|piece_id| SessionEvent::PieceReleased {
            piece_id: *piece_id,
        })
        .collect();
    events.push(SessionEvent::UserLeft {
        connection_id: record.connection_id.clone(),
        user_id: record.user_id.clone(),
    });
    events
}

/// Completion event for the given authoritative piece set, unless already announced.
pub fn completion(pieces: &[Piece], already_announced: bool) -> Option<SessionEvent> {
    if already_announced || !is_puzzle_complete(pieces) {
        return None;
    }
    Some(SessionEvent::PuzzleCompleted)
}
