//! Kumitate synchronization server library.
//!
//! Real-time synchronization core of a collaborative jigsaw puzzle: lease-based piece
//! locks, a replicated connection registry, a cross-node broadcast backplane and the
//! authoritative piece state, served to clients over WebSocket.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
pub mod node;
