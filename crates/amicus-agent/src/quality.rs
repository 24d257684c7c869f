//! Quality gate (§4.F) — the last checkpoint a draft passes through before
//! it becomes an `OutgoingAction::SendText`. Disciplines formatting,
//! rejects deterministic failures outright, and gives the draft at most one
//! rewrite attempt against the fast model before falling back to silence.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendMessage, BackendRole, LLMBackend, ObjectRequest};
use crate::slop::{check_slop, enforce_max_length};

static NEWLINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("valid regex"));

/// What kind of outgoing message this draft is — shapes the judge prompt,
/// not the gate logic itself. The post-draft human-like delay
/// (`sampleHumanDelayMs`, §4.J.12) is sampled downstream of the gate, in
/// `amicus_turn::delay`, off the resulting `OutgoingAction` rather than
/// this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Reply,
    Proactive,
}

pub struct GateRequest {
    pub draft: String,
    pub kind: MessageKind,
    pub max_chars: usize,
    pub is_group: bool,
    pub identity_anti_patterns: Vec<String>,
    pub max_sentences: Option<usize>,
    pub persona_voice_summary: String,
}

#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    pub pass: bool,
    pub authenticity: u8,
    pub naturalness: u8,
    pub pressure: u8,
    pub voice_match: u8,
    pub notes: String,
}

pub struct GateResult {
    pub text: Option<String>,
    pub verdict: Option<JudgeVerdict>,
    pub reason: Option<String>,
    pub attempted_rewrite: bool,
    /// Set when the gate rewrote the draft — callers must drop any
    /// tool-generated media attached to the original (§4.F.6).
    pub drop_media: bool,
}

impl GateResult {
    fn silence(reason: impl Into<String>, attempted_rewrite: bool) -> Self {
        Self {
            text: None,
            verdict: None,
            reason: Some(reason.into()),
            attempted_rewrite,
            drop_media: false,
        }
    }

    fn pass(text: String, verdict: Option<JudgeVerdict>, attempted_rewrite: bool, drop_media: bool) -> Self {
        Self {
            text: Some(text),
            verdict,
            reason: None,
            attempted_rewrite,
            drop_media,
        }
    }
}

/// Collapse newline runs to single spaces (group chats only) and clip to
/// `max_chars` (§4.F.1).
fn discipline(draft: &str, max_chars: usize, is_group: bool) -> String {
    let flattened = if is_group {
        NEWLINE_RUN.replace_all(draft, " ").to_string()
    } else {
        draft.to_string()
    };
    enforce_max_length(&flattened, max_chars)
}

fn count_sentences(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .count()
}

/// Deterministic pre-gate (§4.F.2): empty, sentence-cap overflow, or slop.
/// Returns `Some(failure_reason)` on failure.
fn deterministic_gate(
    text: &str,
    max_sentences: Option<usize>,
    identity_anti_patterns: &[String],
) -> Option<String> {
    if text.trim().is_empty() {
        return Some("empty".to_string());
    }
    if let Some(cap) = max_sentences {
        if count_sentences(text) > cap {
            return Some("sentence_cap".to_string());
        }
    }
    let slop = check_slop(text, identity_anti_patterns);
    if slop.is_slop {
        return Some("slop".to_string());
    }
    None
}

async fn rewrite(
    backend: &dyn LLMBackend,
    draft: &str,
    failure_reason: &str,
    persona_voice_summary: &str,
    max_chars: usize,
    max_sentences: Option<usize>,
) -> Option<String> {
    let limits = match max_sentences {
        Some(n) => format!("under {max_chars} characters and at most {n} sentences"),
        None => format!("under {max_chars} characters"),
    };
    let system = format!(
        "You are rewriting a draft reply that failed a style check ({failure_reason}). \
         Keep the same meaning and voice: {persona_voice_summary}. Stay {limits}. \
         Reply with only the rewritten message, nothing else."
    );
    let req = crate::backend::CompleteRequest {
        role: BackendRole::Fast,
        system,
        messages: vec![BackendMessage::text("user", draft)],
        tools: Vec::new(),
        max_steps: 1,
        max_tokens: 1024,
    };
    let signal = CancellationToken::new();
    backend
        .complete(req, None, &signal)
        .await
        .ok()
        .map(|resp| resp.text)
        .filter(|t| !t.trim().is_empty())
}

fn judge_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "pass": { "type": "boolean" },
            "authenticity": { "type": "integer", "minimum": 1, "maximum": 5 },
            "naturalness": { "type": "integer", "minimum": 1, "maximum": 5 },
            "pressure": { "type": "integer", "minimum": 1, "maximum": 5 },
            "voiceMatch": { "type": "integer", "minimum": 1, "maximum": 5 },
            "notes": { "type": "string" }
        },
        "required": ["pass", "authenticity", "naturalness", "pressure", "voiceMatch", "notes"]
    })
}

async fn judge(
    backend: &dyn LLMBackend,
    text: &str,
    persona_voice_summary: &str,
) -> Option<JudgeVerdict> {
    let system = format!(
        "You evaluate whether a drafted chat message sounds authentically like this \
         persona: {persona_voice_summary}. Score authenticity, naturalness, voiceMatch on \
         1-5 (5 best), pressure on 1-5 (5 = most pressured/performative, worst). \
         Set pass=true only if the message reads like something a real person in this \
         persona would actually send."
    );
    let req = ObjectRequest {
        role: BackendRole::Fast,
        system,
        messages: vec![BackendMessage::text("user", text)],
        schema_name: "quality_verdict".to_string(),
        schema: judge_schema(),
    };
    let resp = backend.complete_object(req).await.ok()?;
    let v = resp.output;
    Some(JudgeVerdict {
        pass: v.get("pass")?.as_bool()?,
        authenticity: v.get("authenticity")?.as_u64()? as u8,
        naturalness: v.get("naturalness")?.as_u64()? as u8,
        pressure: v.get("pressure")?.as_u64()? as u8,
        voice_match: v.get("voiceMatch")?.as_u64()? as u8,
        notes: v.get("notes")?.as_str()?.to_string(),
    })
}

/// Run the full gate (§4.F.1–6). `backend` drives both the bounded rewrite
/// and the LLM judge, always at `role:"fast"`.
pub async fn gate_outgoing_text(req: GateRequest, backend: &Arc<dyn LLMBackend>) -> GateResult {
    let mut attempted_rewrite = false;
    let mut text = discipline(&req.draft, req.max_chars, req.is_group);

    let mut failure = deterministic_gate(&text, req.max_sentences, &req.identity_anti_patterns);

    if let Some(reason) = failure.as_deref() {
        if reason == "slop" || reason == "sentence_cap" {
            attempted_rewrite = true;
            match rewrite(
                backend.as_ref(),
                &text,
                reason,
                &req.persona_voice_summary,
                req.max_chars,
                req.max_sentences,
            )
            .await
            {
                Some(rewritten) => {
                    text = discipline(&rewritten, req.max_chars, req.is_group);
                    failure = deterministic_gate(&text, req.max_sentences, &req.identity_anti_patterns);
                }
                None => return GateResult::silence(reason.to_string(), true),
            }
        }
    }

    if let Some(reason) = failure {
        return GateResult::silence(reason, attempted_rewrite);
    }

    let verdict = judge(backend.as_ref(), &text, &req.persona_voice_summary).await;

    let Some(verdict) = verdict else {
        // Judge unavailable — fall back to deterministic-only pass (§4.F.4).
        return GateResult::pass(text, None, attempted_rewrite, attempted_rewrite);
    };

    if verdict.pass {
        return GateResult::pass(text, Some(verdict), attempted_rewrite, attempted_rewrite);
    }

    attempted_rewrite = true;
    let rewritten = rewrite(
        backend.as_ref(),
        &text,
        &verdict.notes,
        &req.persona_voice_summary,
        req.max_chars,
        req.max_sentences,
    )
    .await;

    let Some(rewritten) = rewritten else {
        return GateResult::silence("quality_gate_fail", true);
    };

    text = discipline(&rewritten, req.max_chars, req.is_group);
    if let Some(reason) = deterministic_gate(&text, req.max_sentences, &req.identity_anti_patterns) {
        return GateResult::silence(reason, true);
    }

    let second_verdict = judge(backend.as_ref(), &text, &req.persona_voice_summary).await;
    match second_verdict {
        Some(v) if v.pass => GateResult::pass(text, Some(v), true, true),
        Some(_) => GateResult::silence("quality_gate_fail", true),
        None => GateResult::pass(text, None, true, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discipline_flattens_newlines_in_group_chats() {
        let out = discipline("line one\n\nline two", 1000, true);
        assert_eq!(out, "line one line two");
    }

    #[test]
    fn discipline_keeps_newlines_in_dms() {
        let out = discipline("line one\nline two", 1000, false);
        assert_eq!(out, "line one\nline two");
    }

    #[test]
    fn deterministic_gate_rejects_empty() {
        assert_eq!(deterministic_gate("   ", None, &[]), Some("empty".to_string()));
    }

    #[test]
    fn deterministic_gate_rejects_over_sentence_cap() {
        let text = "One. Two. Three.";
        assert_eq!(
            deterministic_gate(text, Some(2), &[]),
            Some("sentence_cap".to_string())
        );
    }

    #[test]
    fn deterministic_gate_passes_clean_text() {
        assert_eq!(deterministic_gate("See you at six.", Some(5), &[]), None);
    }

    #[test]
    fn count_sentences_ignores_empty_fragments() {
        assert_eq!(count_sentences("Hi! How are you?"), 2);
    }
}
