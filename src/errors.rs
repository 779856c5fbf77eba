use std::time::Duration;

use thiserror::Error;

/// Terminal outcome of a logical request, or a failure inside one of the
/// coordinator's collaborators.
///
/// `Clone` is required: a single refresh result is fanned out to every
/// request waiting on the re-authentication gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("unauthorized (401)")]
    Unauthorized,
    #[error("server error (status {0})")]
    ServerError(u16),
    #[error("client error (status {0})")]
    ClientError(u16),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("re-authentication failed: {0}")]
    ReAuthentication(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl Error {
    /// Maps a non-success HTTP status onto the error taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Error::Unauthorized,
            500..=599 => Error::ServerError(status),
            _ => Error::ClientError(status),
        }
    }

    /// Whether a retry policy may schedule another attempt after this error.
    ///
    /// Connectivity loss fails fast and decode failures cannot be fixed by
    /// resending, so neither is retryable. `Unauthorized` goes through the
    /// re-authentication gate instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Timeout(_) | Error::ServerError(_) => true,
            Error::ClientError(status) => matches!(status, 408 | 429),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Error::TransportUnavailable(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}
