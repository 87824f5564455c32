use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("mail configuration: {message}")]
    Config { message: String },

    #[error(transparent)]
    Build(#[from] lettre::error::Error),

    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),
}

impl Error {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
