use thiserror::Error;

/// Error kinds the core distinguishes (spec §7). Each variant maps to a
/// retry/fallback policy enforced by its caller, not by this type itself.
#[derive(Debug, Error)]
pub enum AmicusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Context canceled, user abort. Propagate without retry.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Idle/total backend timeout, 5xx-like classification. Retried with
    /// exponential backoff by the caller; fatal once `retryAttempts` exhausted.
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// Backend produced no output before the first-byte deadline. Fatal, no retry.
    #[error("First-byte timeout")]
    FirstByteTimeout,

    /// Backend reports the requested model is missing.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Detected by substring match on the backend error message.
    #[error("Context window overflow")]
    ContextOverflow,

    /// Slop / sentence cap / empty-after-enforcement.
    #[error("Deterministic gate failure: {0}")]
    DeterministicFail(String),

    /// LLM judge says pass=false after the one allowed rewrite.
    #[error("Quality gate failure")]
    QualityGateFail,

    #[error("Tool '{name}' timed out after {ms}ms")]
    ToolTimeout { name: String, ms: u64 },

    #[error("Tool '{name}' error: {message}")]
    ToolError { name: String, message: String },

    /// Memory/session write failed; logged, never fails the turn.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A newer turn superseded this one.
    #[error("Stale discard")]
    StaleDiscard,
}

impl AmicusError {
    /// Stable machine-readable code, e.g. for `turn.error` telemetry events.
    pub fn code(&self) -> &'static str {
        match self {
            AmicusError::Config(_) => "CONFIG_ERROR",
            AmicusError::Database(_) => "DATABASE_ERROR",
            AmicusError::Serialization(_) => "SERIALIZATION_ERROR",
            AmicusError::Io(_) => "IO_ERROR",
            AmicusError::Internal(_) => "INTERNAL_ERROR",
            AmicusError::Aborted(_) => "ABORTED",
            AmicusError::Transient(_) => "TRANSIENT",
            AmicusError::FirstByteTimeout => "FIRST_BYTE_TIMEOUT",
            AmicusError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            AmicusError::ContextOverflow => "CONTEXT_OVERFLOW",
            AmicusError::DeterministicFail(_) => "DETERMINISTIC_FAIL",
            AmicusError::QualityGateFail => "QUALITY_GATE_FAIL",
            AmicusError::ToolTimeout { .. } => "TOOL_TIMEOUT",
            AmicusError::ToolError { .. } => "TOOL_ERROR",
            AmicusError::PersistenceError(_) => "PERSISTENCE_ERROR",
            AmicusError::StaleDiscard => "STALE_DISCARD",
        }
    }

    /// Whether a caller should retry this with backoff (the `transient` policy).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AmicusError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, AmicusError>;
