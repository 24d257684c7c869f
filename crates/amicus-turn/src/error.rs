use thiserror::Error;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("turn aborted: {0}")]
    Aborted(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error(transparent)]
    Memory(#[from] amicus_memory::MemoryError),

    #[error(transparent)]
    Core(#[from] amicus_core::AmicusError),
}

impl From<TurnError> for amicus_core::AmicusError {
    fn from(e: TurnError) -> Self {
        match e {
            TurnError::Aborted(msg) => amicus_core::AmicusError::Aborted(msg),
            TurnError::RateLimited(msg) => amicus_core::AmicusError::Transient(msg),
            TurnError::Memory(e) => e.into(),
            TurnError::Core(e) => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, TurnError>;
