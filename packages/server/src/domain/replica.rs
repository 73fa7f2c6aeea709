//! Local replica of a session board.
//!
//! Clients (and tests standing in for them) keep one of these and feed it snapshots and
//! relayed events. Events may arrive duplicated or out of order; piece state only moves
//! forward by `version`, so applying the same event twice is the same as applying it once.

use std::collections::BTreeMap;

use super::{
    entity::{Participant, Piece, SessionSnapshot},
    event::SessionEvent,
    value_object::{ConnectionId, PieceId, PuzzleId, SessionId},
};

#[derive(Debug, Clone, PartialEq)]
pub struct BoardReplica {
    pub session_id: SessionId,
    pub puzzle_id: PuzzleId,
    pieces: BTreeMap<PieceId, Piece>,
    participants: BTreeMap<ConnectionId, Participant>,
    locks: BTreeMap<PieceId, ConnectionId>,
    completed: bool,
}

impl BoardReplica {
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let mut replica = Self {
            session_id: snapshot.session_id.clone(),
            puzzle_id: snapshot.puzzle_id.clone(),
            pieces: BTreeMap::new(),
            participants: BTreeMap::new(),
            locks: BTreeMap::new(),
            completed: false,
        };
        replica.apply_snapshot(snapshot);
        replica
    }

    /// Merge a fresh snapshot.
    ///
    /// Participants and completion are replaced. Pieces keep whichever version is newer,
    /// since an event relayed before the snapshot was read may already be ahead of it.
    pub fn apply_snapshot(&mut self, snapshot: SessionSnapshot) {
        self.participants = snapshot
            .participants
            .into_iter()
            .map(|participant| (participant.connection_id.clone(), participant))
            .collect();
        self.locks
            .retain(|_, holder| self.participants.contains_key(holder));
        for piece in snapshot.pieces {
            self.upsert_piece(piece);
        }
        self.completed = snapshot.completed;
    }

    /// Apply one relayed event. Returns whether visible state changed.
    pub fn apply(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::PieceMoved { piece } => self.upsert_piece(piece.clone()),
            SessionEvent::PieceLocked {
                piece_id,
                connection_id,
            } => {
                if self.piece(*piece_id).is_some_and(|piece| piece.is_placed) {
                    return false;
                }
                self.locks.insert(*piece_id, connection_id.clone()).as_ref() != Some(connection_id)
            }
            SessionEvent::PieceReleased { piece_id } => self.locks.remove(piece_id).is_some(),
            SessionEvent::UserJoined { participant } => {
                let previous = self
                    .participants
                    .insert(participant.connection_id.clone(), participant.clone());
                previous.as_ref() != Some(participant)
            }
            SessionEvent::UserLeft { connection_id, .. } => {
                let before = self.locks.len();
                self.locks.retain(|_, holder| holder != connection_id);
                let removed = self.participants.remove(connection_id).is_some();
                removed || before != self.locks.len()
            }
            SessionEvent::PuzzleCompleted => {
                let changed = !self.completed;
                self.completed = true;
                changed
            }
            SessionEvent::ChatPosted { .. } => false,
        }
    }

    fn upsert_piece(&mut self, piece: Piece) -> bool {
        if let Some(existing) = self.pieces.get(&piece.id)
            && existing.version >= piece.version
        {
            return false;
        }
        if piece.is_placed {
            self.locks.remove(&piece.id);
        }
        self.pieces.insert(piece.id, piece);
        true
    }

    pub fn piece(&self, piece_id: PieceId) -> Option<&Piece> {
        self.pieces.get(&piece_id)
    }

    pub fn pieces(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.values()
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn participant(&self, connection_id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(connection_id)
    }

    pub fn lock_holder(&self, piece_id: PieceId) -> Option<&ConnectionId> {
        self.locks.get(&piece_id)
    }

    pub fn placed_count(&self) -> usize {
        self.pieces.values().filter(|piece| piece.is_placed).count()
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}
