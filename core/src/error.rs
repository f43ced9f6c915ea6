//! Error types for the push API client.
//!
//! # Design
//! `NotFound` gets a dedicated variant because accessor operations turn it
//! into `Ok(None)`. Remaining 4xx and 5xx responses are split into `Client`
//! and `Server` so callers can tell a rejected request from a remote outage.
//! Transport failures are carried unchanged behind `Transport`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by `PushClient` operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server returned 404.
    #[error("resource not found")]
    NotFound,

    /// The server returned a 4xx status other than 404.
    #[error("client error: HTTP {status}: {body}")]
    Client { status: u16, body: String },

    /// The server returned a 5xx status.
    #[error("server error: HTTP {status}: {body}")]
    Server { status: u16, body: String },

    /// The server returned a status outside 2xx/4xx/5xx, e.g. an unfollowed redirect.
    #[error("unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Connection, TLS or timeout failure raised by the transport.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A timestamp could not be rendered as ISO-8601.
    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }

    /// HTTP status behind this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound => Some(404),
            ApiError::Client { status, .. }
            | ApiError::Server { status, .. }
            | ApiError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ureq::Error> for ApiError {
    fn from(e: ureq::Error) -> Self {
        ApiError::Transport(Box::new(e))
    }
}
