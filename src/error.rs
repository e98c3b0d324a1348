//! Crate-level error taxonomy.
//!
//! Every REST call converts transport and decode failures into one of these
//! variants at its own boundary, so callers only ever match on `ChatError`.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Bad credentials, expired token, or HTTP 401. Needs new credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Username rejected by the registration endpoint.
    #[error("registration failed: {0}")]
    Registration(String),

    /// History could not be fetched or decoded.
    #[error("could not load message history: {0}")]
    HistoryLoad(String),

    /// The REST write behind a send failed; `text` is handed back so the
    /// caller can restore it into the input field. `cause` keeps the original
    /// kind, so a 401 or 429 is still recognisable.
    #[error("message was not sent: {cause}")]
    SendFailure {
        text: String,
        #[source]
        cause: Box<ChatError>,
    },

    /// Edit or delete targeted a message with no server identifier.
    #[error("message has no server identifier yet")]
    MissingIdentifier,

    /// HTTP 429.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Any other non-2xx response, carrying the server's `detail` if present.
    #[error("request to {endpoint} failed ({status}): {detail}")]
    Request {
        endpoint: String,
        status: u16,
        detail: String,
    },

    /// Connection-level failure on the REST path.
    #[error("could not reach {url}: {detail}")]
    Connect { url: String, detail: String },

    /// Response body did not have the expected shape.
    #[error("unexpected response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },

    /// Live channel failure.
    #[error("live channel error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Reading or writing the persisted session failed.
    #[error("session storage error at {path}: {detail}")]
    Storage { path: String, detail: String },
}

impl ChatError {
    /// Whether the user has to sign in again before retrying.
    pub fn requires_reauth(&self) -> bool {
        matches!(self.root(), ChatError::Authentication(_))
    }

    /// Whether the server throttled the request, looking through a failed send.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.root(), ChatError::RateLimited)
    }

    /// The innermost error behind any `SendFailure` wrapping.
    pub fn root(&self) -> &ChatError {
        match self {
            ChatError::SendFailure { cause, .. } => cause.root(),
            other => other,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}
