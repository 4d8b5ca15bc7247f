use thiserror::Error;
use wstorage::errors::StorageError;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("access token rejected: {0}")]
    Unauthorized(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;

impl From<FetchError> for StorageError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Request(e) => StorageError::Transport(e.to_string()),
            FetchError::Unauthorized(body) => StorageError::Unauthorized(body),
            FetchError::Status { status, body } => StorageError::Remote { status, body },
            FetchError::Json(e) => StorageError::MalformedRecord(e.to_string()),
            FetchError::UnexpectedPayload(detail) => StorageError::MalformedRecord(detail),
            FetchError::Config(detail) => StorageError::Config(detail),
        }
    }
}
