//! Terminal client for Kumitate.
//!
//! Joins one session over WebSocket, keeps a local replica of the board and turns
//! typed commands into protocol messages.

pub mod command;
mod domain;
pub mod error;
mod formatter;
mod runner;
mod session;
mod ui;

pub use runner::run_client;
pub use session::ClientOptions;
