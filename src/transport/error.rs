use thiserror::Error;

/// Failures surfaced by a [`Transport`](super::Transport) call.
///
/// The transport never retries; classifying these into recovery actions is the
/// lifecycle manager's job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused by inference server at {0}")]
    ConnectionRefused(String),
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("server returned HTTP {code}: {body}")]
    HttpStatus { code: u16, body: String },
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Maps a reqwest failure onto the transport taxonomy.
    ///
    /// Anything that is neither a timeout nor a decode failure is treated as a
    /// connection problem, since the request never produced a usable answer.
    pub fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(url.to_string())
        } else if err.is_decode() {
            TransportError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::HttpStatus {
                code: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            TransportError::ConnectionRefused(url.to_string())
        }
    }

    /// HTTP status code, when the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::HttpStatus { code, .. } => Some(*code),
            _ => None,
        }
    }
}
