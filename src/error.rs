//! Error taxonomy shared by every stage of the translation path.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No provider credential. Callers normally never see this: the adapter
    /// degrades to pass-through instead.
    #[error("no translation provider credential configured")]
    ConfigurationAbsent,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider error: {message}")]
    ProviderFailure { status: Option<u16>, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("{unresolved} placeholder token(s) could not be restored")]
    RestorationMismatch { unresolved: usize },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("content source error: {0}")]
    ContentSource(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 408/429/5xx and transport failures are typically temporary.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::ProviderFailure { status, .. } => match status {
                Some(code) => *code == 408 || *code == 429 || (500..600).contains(code),
                None => false,
            },
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Error::ProviderFailure {
                status: Some(status.as_u16()),
                message: err.to_string(),
            },
            None => Error::Network(err.to_string()),
        }
    }
}
