//! Generation loop (§4.H) — `generate_disciplined_reply`: drives the
//! backend through tool calls, enforces length and slop limits with bounded
//! rewrite attempts, and returns a fully-disciplined draft (or a reason the
//! turn stayed silent).

use std::sync::Arc;

use amicus_core::config::AmicusConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{
    BackendError, BackendMessage, BackendRole, CompleteRequest, LLMBackend, ToolSpec,
};
use crate::slop::{check_slop, enforce_max_length};
use crate::tools::{to_definitions, Tool, ToolExecutorAdapter};

pub struct GenerationRequest {
    pub system: String,
    pub messages: Vec<BackendMessage>,
    pub verified_urls: Vec<String>,
    pub is_group: bool,
}

pub struct GenerationOutcome {
    pub text: Option<String>,
    pub reason: Option<String>,
}

impl GenerationOutcome {
    fn silence(reason: impl Into<String>) -> Self {
        Self { text: None, reason: Some(reason.into()) }
    }
    fn text(text: String) -> Self {
        Self { text: Some(text), reason: None }
    }
}

/// Extracts `http(s)://` links from free text, in order of first appearance,
/// de-duplicated — feeds `ToolContext.verified_urls` (§4.H.5).
pub fn extract_verified_urls(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.split_whitespace() {
        let trimmed = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '/' && c != ':' && c != '.' && c != '-' && c != '_' && c != '?' && c != '=' && c != '&');
        if (trimmed.starts_with("http://") || trimmed.starts_with("https://")) && !out.contains(&trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Flattens newline runs into single spaces for group-chat replies, matching
/// the discipline step the quality gate also applies (§4.F.1) — done here
/// too so the slop check sees the same shape the gate will eventually see.
fn group_flatten(text: &str, is_group: bool) -> String {
    if !is_group {
        return text.to_string();
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub async fn generate_disciplined_reply(
    cfg: &AmicusConfig,
    backend: &Arc<dyn LLMBackend>,
    tools: &[Box<dyn Tool>],
    req: GenerationRequest,
    signal: &CancellationToken,
) -> amicus_core::Result<GenerationOutcome> {
    let tool_specs: Vec<ToolSpec> = to_definitions(tools);
    let executor = ToolExecutorAdapter::new(tools, req.verified_urls.clone());

    let mut messages = req.messages.clone();
    let mut attempt = 0u32;
    let mut last_violations: Vec<String> = Vec::new();

    loop {
        let complete_req = CompleteRequest {
            role: BackendRole::Default,
            system: req.system.clone(),
            messages: messages.clone(),
            tools: tool_specs.clone(),
            max_steps: cfg.generation.max_steps,
            max_tokens: cfg.generation.max_output_tokens,
        };

        let response = match call_with_fallback(backend, complete_req, Some(&executor), signal).await {
            Ok(r) => r,
            Err(BackendError::Aborted) => return Err(amicus_core::AmicusError::Aborted("generation cancelled".into())),
            Err(e) => return Err(e.into()),
        };

        if response.text.trim().is_empty() {
            return Ok(GenerationOutcome::silence("model_silence"));
        }

        let disciplined = group_flatten(
            &enforce_max_length(&response.text, cfg.quality.max_chars),
            req.is_group,
        );
        let slop = check_slop(&disciplined, &cfg.agent.anti_patterns);

        if !slop.is_slop {
            return Ok(GenerationOutcome::text(disciplined));
        }

        last_violations = slop.violations;
        if attempt >= cfg.quality.max_regens {
            warn!(attempts = attempt, "generation exhausted regen budget on slop");
            return Ok(GenerationOutcome::silence("slop_unresolved"));
        }
        attempt += 1;
        debug!(attempt, violations = ?last_violations, "regenerating after slop detection");

        messages.push(BackendMessage::text("assistant", disciplined));
        messages.push(BackendMessage::text(
            "user",
            format!(
                "That reply tripped these style checks: {}. Rewrite it avoiding those patterns, \
                 same meaning, same voice.",
                last_violations.join(", ")
            ),
        ));
    }
}

/// Backend failure classification + fallback (§4.H.6-7): transient errors
/// are retried by the backend itself (`post_with_retry`); `ModelUnavailable`
/// gets exactly one retry here with an empty-model (default params) attempt.
async fn call_with_fallback(
    backend: &Arc<dyn LLMBackend>,
    req: CompleteRequest,
    tools: Option<&dyn crate::backend::ToolExecutor>,
    signal: &CancellationToken,
) -> Result<crate::backend::CompleteResponse, BackendError> {
    match backend.complete(req.clone(), tools, signal).await {
        Err(BackendError::ModelUnavailable(_)) => {
            warn!("model unavailable, retrying once with default parameters");
            backend.complete(req, tools, signal).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_verified_urls_finds_links_in_order() {
        let urls = extract_verified_urls("check https://a.example and http://b.example too");
        assert_eq!(urls, vec!["https://a.example", "http://b.example"]);
    }

    #[test]
    fn extract_verified_urls_dedupes() {
        let urls = extract_verified_urls("https://a.example and https://a.example again");
        assert_eq!(urls, vec!["https://a.example"]);
    }

    #[test]
    fn extract_verified_urls_strips_trailing_punctuation() {
        let urls = extract_verified_urls("see (https://a.example).");
        assert_eq!(urls, vec!["https://a.example"]);
    }

    #[test]
    fn group_flatten_collapses_whitespace() {
        assert_eq!(group_flatten("a\n\nb   c", true), "a b c");
    }

    #[test]
    fn group_flatten_noop_for_dms() {
        assert_eq!(group_flatten("a\nb", false), "a\nb");
    }
}
