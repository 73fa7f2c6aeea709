//! Error types for the terminal client.

use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server refused the join; retrying cannot help
    #[error("server rejected join ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Could not reach the server
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The socket closed after the session was joined
    #[error("Connection lost")]
    ConnectionLost,
}
