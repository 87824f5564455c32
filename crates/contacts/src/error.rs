use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[cfg(feature = "mongodb")]
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    /// A field failed validation; `message` is safe to show to the caller.
    #[error("{message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("contact already registered: {phone}")]
    Conflict { phone: String },

    #[error("contact not found: {phone}")]
    NotFound { phone: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conflict(phone: impl Into<String>) -> Self {
        Self::Conflict {
            phone: phone.into(),
        }
    }

    #[must_use]
    pub fn not_found(phone: impl Into<String>) -> Self {
        Self::NotFound {
            phone: phone.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
