use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No connected session to carry the request.
    #[error("no WhatsApp session is connected")]
    NoSession,

    /// The lease was issued for a session that has since been replaced.
    #[error("session handle is stale (generation {lease}, current {current})")]
    StaleHandle { lease: u64, current: u64 },

    #[error("invalid destination: {destination}")]
    InvalidDestination { destination: String },

    /// The backend refused or failed to deliver.
    #[error("send failed: {reason}")]
    SendFailed { reason: String },

    #[error("sidecar did not answer within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_destination(destination: impl Into<String>) -> Self {
        Self::InvalidDestination {
            destination: destination.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
