//! A deterministic [`LLMBackend`] double that replays scripted text instead
//! of calling a model. Used by the `eval` regression harness and by crate
//! tests that need to drive the generation loop without a live provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    BackendError, CompleteRequest, CompleteResponse, LLMBackend, ToolExecutor, Usage,
};

/// Replies are handed out in order; once exhausted the last one repeats, so
/// a regen loop that keeps calling `complete` sees a stable script instead
/// of panicking on an empty queue.
pub struct ScriptedBackend {
    replies: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
        }
    }

    /// A backend that always returns the same reply, for scenarios that
    /// need every regen attempt to see identical text.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self::new([reply.into()])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMBackend for ScriptedBackend {
    async fn complete(
        &self,
        _req: CompleteRequest,
        _tools: Option<&dyn ToolExecutor>,
        _signal: &CancellationToken,
    ) -> Result<CompleteResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        let text = if replies.len() > 1 {
            replies.pop().unwrap()
        } else {
            replies.last().cloned().unwrap_or_default()
        };
        Ok(CompleteResponse {
            text,
            steps: Vec::new(),
            model_id: "scripted".to_string(),
            usage: Usage::default(),
            stop_reason: "end_turn".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_repeats_last() {
        let backend = ScriptedBackend::new(["one", "two"]);
        let signal = CancellationToken::new();
        let req = || CompleteRequest {
            role: crate::backend::BackendRole::Default,
            system: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            max_steps: 1,
            max_tokens: 100,
        };
        assert_eq!(backend.complete(req(), None, &signal).await.unwrap().text, "one");
        assert_eq!(backend.complete(req(), None, &signal).await.unwrap().text, "two");
        assert_eq!(backend.complete(req(), None, &signal).await.unwrap().text, "two");
        assert_eq!(backend.call_count(), 3);
    }
}
