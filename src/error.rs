// Error taxonomy for chatsync
// Every I/O boundary converts its failures into one of these classes

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    /// Transport channel unavailable or the link failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// History or contact load failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Inbound push event missing required fields
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Outbound message rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ChatError {
    pub fn is_connection(&self) -> bool {
        matches!(self, ChatError::Connection(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Fetch(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Connection(err.to_string())
    }
}
