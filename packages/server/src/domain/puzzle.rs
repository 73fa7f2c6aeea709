//! Puzzle layouts and snap geometry.
//!
//! The layout of a puzzle (target slot and scrambled start of every piece) comes from
//! the external catalog. Everything here is deterministic so that every node reaches the
//! same placement decision for the same input.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    entity::Piece,
    value_object::{PieceId, PuzzleId},
};

/// Geometric threshold within which a piece counts as placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapTolerance {
    /// Maximum Euclidean distance to the target position.
    pub distance: f64,
    /// Maximum absolute rotation delta in degrees (after normalization).
    pub rotation_degrees: f64,
}

impl Default for SnapTolerance {
    fn default() -> Self {
        Self {
            distance: 12.0,
            rotation_degrees: 10.0,
        }
    }
}

impl SnapTolerance {
    /// Whether `(x, y, rotation)` is close enough to the slot's target.
    pub fn accepts(&self, slot: &PieceSlot, x: f64, y: f64, rotation: f64) -> bool {
        let dx = x - slot.target_x;
        let dy = y - slot.target_y;
        let distance = (dx * dx + dy * dy).sqrt();
        distance <= self.distance && angle_matches(rotation, slot.target_rotation, self.rotation_degrees)
    }
}

/// Target slot and start position of one piece.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PieceSlot {
    pub id: PieceId,
    pub target_x: f64,
    pub target_y: f64,
    #[serde(default)]
    pub target_rotation: f64,
    pub start_x: f64,
    pub start_y: f64,
    #[serde(default)]
    pub start_rotation: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("puzzle '{0}' has no pieces")]
    NoPieces(String),

    #[error("puzzle '{puzzle_id}' defines piece {piece_id} more than once")]
    DuplicatePiece { puzzle_id: String, piece_id: u32 },

    #[error("puzzle '{0}' has a negative snap tolerance")]
    NegativeTolerance(String),
}

/// Complete definition of a puzzle as consumed from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuzzleLayout {
    pub puzzle_id: PuzzleId,
    pub slots: Vec<PieceSlot>,
    #[serde(default)]
    pub snap: SnapTolerance,
}

/// Parameters for [`PuzzleLayout::grid`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub cols: u32,
    pub rows: u32,
    pub piece_width: f64,
    pub piece_height: f64,
    pub seed: u32,
    /// Scramble start rotations in 90° steps.
    #[serde(default)]
    pub rotate: bool,
}

impl PuzzleLayout {
    pub fn validate(&self) -> Result<(), LayoutError> {
        let puzzle_id = self.puzzle_id.as_str().to_string();
        if self.slots.is_empty() {
            return Err(LayoutError::NoPieces(puzzle_id));
        }
        if self.snap.distance < 0.0 || self.snap.rotation_degrees < 0.0 {
            return Err(LayoutError::NegativeTolerance(puzzle_id));
        }
        let mut seen = HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.id) {
                return Err(LayoutError::DuplicatePiece {
                    puzzle_id,
                    piece_id: slot.id.value(),
                });
            }
        }
        Ok(())
    }

    pub fn slot(&self, piece_id: PieceId) -> Option<&PieceSlot> {
        self.slots.iter().find(|slot| slot.id == piece_id)
    }

    pub fn piece_count(&self) -> usize {
        self.slots.len()
    }

    /// Pieces at their scrambled start positions, version 0, unplaced.
    pub fn initial_pieces(&self) -> Vec<Piece> {
        self.slots
            .iter()
            .map(|slot| Piece {
                id: slot.id,
                puzzle_id: self.puzzle_id.clone(),
                x: slot.start_x,
                y: slot.start_y,
                rotation: normalize_angle(slot.start_rotation),
                is_placed: false,
                version: 0,
            })
            .collect()
    }

    /// Rectangular grid puzzle with deterministic scrambled start positions.
    ///
    /// Piece `r * cols + c` targets `(c * piece_width, r * piece_height)`. Start positions
    /// are drawn from a tray to the right of the board, so no piece starts inside its
    /// snap radius as long as the tolerance is smaller than a piece.
    pub fn grid(puzzle_id: PuzzleId, spec: GridSpec, snap: SnapTolerance) -> Self {
        let board_width = f64::from(spec.cols) * spec.piece_width;
        let board_height = f64::from(spec.rows) * spec.piece_height;
        let tray_x = board_width + spec.piece_width;

        let mut slots = Vec::with_capacity((spec.cols * spec.rows) as usize);
        for row in 0..spec.rows {
            for col in 0..spec.cols {
                let index = row * spec.cols + col;
                let start_rotation = if spec.rotate {
                    f64::from(splitmix32(spec.seed ^ index.wrapping_mul(0x9e37)) % 4) * 90.0
                } else {
                    0.0
                };
                slots.push(PieceSlot {
                    id: PieceId::new(index),
                    target_x: f64::from(col) * spec.piece_width,
                    target_y: f64::from(row) * spec.piece_height,
                    target_rotation: 0.0,
                    start_x: tray_x + rand_unit(spec.seed, index * 2) * board_width,
                    start_y: rand_unit(spec.seed, index * 2 + 1) * board_height,
                    start_rotation,
                });
            }
        }

        Self {
            puzzle_id,
            slots,
            snap,
        }
    }
}

/// True when every piece of the puzzle is placed.
///
/// Computed from the authoritative per-piece state; an empty set is never complete.
pub fn is_puzzle_complete(pieces: &[Piece]) -> bool {
    !pieces.is_empty() && pieces.iter().all(|piece| piece.is_placed)
}

pub fn splitmix32(mut value: u32) -> u32 {
    value = value.wrapping_add(0x9e37_79b9);
    value = (value ^ (value >> 16)).wrapping_mul(0x85eb_ca6b);
    value = (value ^ (value >> 13)).wrapping_mul(0xc2b2_ae35);
    value ^ (value >> 16)
}

/// Deterministic value in `[0, 1)`.
pub fn rand_unit(seed: u32, salt: u32) -> f64 {
    let mixed = splitmix32(seed ^ splitmix32(salt));
    f64::from(mixed >> 8) / f64::from(1u32 << 24)
}

/// Normalize to `[0, 360)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let normalized = angle.rem_euclid(360.0);
    if normalized >= 360.0 { 0.0 } else { normalized }
}

/// Signed shortest delta from `current` to `target`, in `(-180, 180]`.
pub fn angle_delta(target: f64, current: f64) -> f64 {
    let diff = normalize_angle(target - current);
    if diff > 180.0 { diff - 360.0 } else { diff }
}

pub fn angle_matches(a: f64, b: f64, tolerance: f64) -> bool {
    angle_delta(a, b).abs() <= tolerance
}
