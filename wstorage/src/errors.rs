use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite operation failed: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Unknown data source: {0}")]
    UnknownSource(String),

    #[error("Token acquisition failed: {0}")]
    Auth(String),

    #[error("Upstream rejected the access token: {0}")]
    Unauthorized(String),

    #[error("Upstream returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Upstream request failed: {0}")]
    Transport(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Warehouse operation failed: {0}")]
    Warehouse(String),

    #[error("No upstream data found within {0} day(s) before today")]
    CeilingNotFound(u32),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Stable machine-readable category, recorded with failed runs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Auth(_) => "auth_error",
            StorageError::Unauthorized(_)
            | StorageError::Remote { .. }
            | StorageError::Transport(_)
            | StorageError::CeilingNotFound(_) => "remote_error",
            StorageError::MalformedRecord(_) | StorageError::Json(_) => "malformed_record",
            StorageError::SQLite(_) | StorageError::Warehouse(_) => "warehouse_error",
            StorageError::Config(_)
            | StorageError::InvalidArg(_)
            | StorageError::UnknownSource(_) => "invalid_request",
            StorageError::Io(_) | StorageError::Other(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
