use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid import payload: {0}")]
    InvalidImport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<MemoryError> for amicus_core::AmicusError {
    fn from(e: MemoryError) -> Self {
        amicus_core::AmicusError::PersistenceError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
