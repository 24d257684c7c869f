//! `LLMBackend` — the external interface the core consumes (§6). The core
//! never speaks to a specific vendor; it speaks to this trait. Only one
//! concrete implementation ships in this crate ([`AnthropicBackend`]), since
//! provider selection, API-key management, and CLI-backed providers are
//! explicitly out of the core's scope (§1) — a deployment wires in whichever
//! `LLMBackend` it wants.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// `role ∈ {"default","fast"}` (§6). Backends may map both to the same model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    Default,
    Fast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMessage {
    pub role: String,
    /// Plain text, or a raw content-block array (tool_use/tool_result) when
    /// the generation loop is mid tool-call — kept as a `Value` rather than
    /// a closed enum since content shapes vary by step (§9 duck-typed
    /// payloads design note).
    pub content: serde_json::Value,
}

impl BackendMessage {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: serde_json::Value::String(text.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CompleteRequest {
    pub role: BackendRole,
    pub system: String,
    pub messages: Vec<BackendMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_steps: u32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ToolStep {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: String,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub struct CompleteResponse {
    pub text: String,
    pub steps: Vec<ToolStep>,
    pub model_id: String,
    pub usage: Usage,
    pub stop_reason: String,
}

#[derive(Debug, Clone)]
pub struct ObjectRequest {
    pub role: BackendRole,
    pub system: String,
    pub messages: Vec<BackendMessage>,
    pub schema_name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ObjectResponse {
    pub output: serde_json::Value,
    pub model_id: String,
}

/// Error kinds a backend call can surface, matching the taxonomy in §7.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("aborted")]
    Aborted,
    #[error("transient: {0}")]
    Transient(String),
    #[error("first byte timeout")]
    FirstByteTimeout,
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("context window overflow")]
    ContextOverflow,
    #[error("structured output unsupported by this backend")]
    ObjectUnsupported,
    #[error("tool '{name}' timed out after {ms}ms")]
    ToolTimeout { name: String, ms: u64 },
}

impl From<BackendError> for amicus_core::AmicusError {
    fn from(e: BackendError) -> Self {
        use amicus_core::AmicusError as E;
        match e {
            BackendError::Aborted => E::Aborted("backend call aborted".into()),
            BackendError::Transient(m) => E::Transient(m),
            BackendError::FirstByteTimeout => E::FirstByteTimeout,
            BackendError::ModelUnavailable(m) => E::ModelUnavailable(m),
            BackendError::ContextOverflow => E::ContextOverflow,
            BackendError::ObjectUnsupported => E::Internal("structured output unsupported".into()),
            BackendError::ToolTimeout { name, ms } => E::ToolTimeout { name, ms },
        }
    }
}

/// Pluggable tool executor the backend calls mid-loop (§4.H.5). The backend
/// itself only knows how to drive the step loop and wrap output; it has no
/// opinion on what a tool does.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        timeout: Duration,
        signal: &CancellationToken,
    ) -> (String, bool);
}

/// Optional embeddings collaborator (§6: "Optional `embedder` field").
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
    fn dims(&self) -> usize;
}

#[async_trait]
pub trait LLMBackend: Send + Sync {
    async fn complete(
        &self,
        req: CompleteRequest,
        tools: Option<&dyn ToolExecutor>,
        signal: &CancellationToken,
    ) -> Result<CompleteResponse, BackendError>;

    /// Structured-output completion (§6, used by the quality judge and
    /// proactive decisions). Optional — backends without native tool-forced
    /// output may return `ObjectUnsupported`.
    async fn complete_object(&self, req: ObjectRequest) -> Result<ObjectResponse, BackendError> {
        let _ = req;
        Err(BackendError::ObjectUnsupported)
    }

    fn embedder(&self) -> Option<&dyn Embedder> {
        None
    }
}

/// Per-backend circuit breaker state (§4.H.7, §9 design note). Counters are
/// mutated only by the task that observed the failure; readers tolerate
/// stale reads — the breaker sheds load, it does not need to be exact.
pub struct CircuitBreaker {
    failures: AtomicU32,
    open_until_ms: AtomicU64,
    threshold: u32,
    open_duration_ms: u64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, open_duration_ms: u64) -> Self {
        Self {
            failures: AtomicU32::new(0),
            open_until_ms: AtomicU64::new(0),
            threshold,
            open_duration_ms,
        }
    }

    pub fn is_open(&self, now_ms: u64) -> bool {
        now_ms < self.open_until_ms.load(Ordering::Relaxed)
    }

    pub fn record_failure(&self, now_ms: u64) {
        let count = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.threshold {
            self.open_until_ms
                .store(now_ms + self.open_duration_ms, Ordering::Relaxed);
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        // 5 failures opens for 60s (§4.H.7).
        Self::new(5, 60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(5, 60_000);
        for _ in 0..4 {
            cb.record_failure(0);
        }
        assert!(!cb.is_open(0));
        cb.record_failure(0);
        assert!(cb.is_open(0));
        assert!(!cb.is_open(60_000));
    }

    #[test]
    fn breaker_resets_on_success() {
        let cb = CircuitBreaker::new(5, 60_000);
        for _ in 0..4 {
            cb.record_failure(0);
        }
        cb.record_success();
        cb.record_failure(0);
        assert!(!cb.is_open(0));
    }
}
