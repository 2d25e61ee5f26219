//! Error taxonomy of the chat core

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Unknown room, guest session, message or FAQ entry.
    #[error("{0} not found")]
    NotFound(String),

    /// Caller is not a participant of the room, or has the wrong role.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Requested transition or write is not allowed in the room's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing, malformed or expired credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The generative-text endpoint failed. Absorbed by the bot engine.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The generative-text endpoint did not answer in time. Absorbed by the bot engine.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ChatError {
    pub fn room_not_found() -> ChatError {
        ChatError::NotFound("room".to_owned())
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
