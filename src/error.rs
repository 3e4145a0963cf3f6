use reqwest::StatusCode;
use thiserror::Error;

/// Failures that end a chat turn.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request could not be sent or the body stream broke off.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("chat request failed: {status} - {body}")]
    Status { status: StatusCode, body: String },

    /// An `error` event arrived on the stream.
    #[error("server reported an error: {0}")]
    Server(String),
}

pub type ChatResult<T> = Result<T, ChatError>;
