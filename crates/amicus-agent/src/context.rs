//! Context builder (§4.G) — assembles the four message strata the
//! generation loop hands to the backend: `system`, `data_messages`,
//! `history`, `user_messages`.

use std::sync::Arc;

use amicus_core::config::AmicusConfig;
use amicus_core::{ChatId, IncomingMessage, TrustTier};
use amicus_memory::manager::MemoryManager;
use amicus_sessions::manager::SessionManager;
use amicus_sessions::types::{MessageRole, SessionKey};

use crate::backend::BackendMessage;
use crate::prompt::{PromptBuilder, SessionInfo, SystemPrompt};

/// Rough token estimate — 4 characters per token, the same heuristic most
/// chat SDKs use when an exact tokenizer isn't worth the dependency.
fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() / 4).max(1) as u32
}

pub struct BuiltContext {
    pub system: SystemPrompt,
    pub data_messages: Vec<BackendMessage>,
    pub history: Vec<BackendMessage>,
    pub user_messages: Vec<BackendMessage>,
}

impl BuiltContext {
    /// Flatten strata into the single message list the backend consumes:
    /// data messages, then history, then the current user turn.
    pub fn into_messages(self) -> Vec<BackendMessage> {
        let mut out = Vec::with_capacity(
            self.data_messages.len() + self.history.len() + self.user_messages.len(),
        );
        out.extend(self.data_messages);
        out.extend(self.history);
        out.extend(self.user_messages);
        out
    }
}

pub struct ContextBuilder {
    memory: Arc<MemoryManager>,
    sessions: Arc<SessionManager>,
    prompt: PromptBuilder,
}

impl ContextBuilder {
    pub fn new(memory: Arc<MemoryManager>, sessions: Arc<SessionManager>, prompt: PromptBuilder) -> Self {
        Self { memory, sessions, prompt }
    }

    /// Derives the session slot for a chat. Sessions are keyed per-user in
    /// the schema (`amicus-sessions`'s original design unifies a user across
    /// channels), but the turn engine only knows the chat — so the chat id
    /// itself stands in for `user_id` here, with a single `"main"` session
    /// per chat (documented Open Question resolution).
    fn session_key(&self, chat_id: &ChatId) -> SessionKey {
        SessionKey::new(chat_id.as_str(), "amicus", "main")
    }

    /// Build the four strata for a turn batch (§4.G). `behavior_override`
    /// is an optional one-line addition to the system block, e.g. "You are
    /// in a group chat; keep it one line." Retries compaction once if the
    /// estimated prompt exceeds `cfg.generation.max_context_tokens`.
    pub async fn build(
        &self,
        cfg: &AmicusConfig,
        chat_id: &ChatId,
        is_group: bool,
        trust: TrustTier,
        messages: &[IncomingMessage],
        behavior_override: Option<&str>,
    ) -> amicus_core::Result<BuiltContext> {
        let mut attempt = 0;
        loop {
            let ctx = self.build_once(cfg, chat_id, is_group, trust, messages, behavior_override)?;
            let total_tokens: u32 = ctx
                .data_messages
                .iter()
                .chain(ctx.history.iter())
                .chain(ctx.user_messages.iter())
                .map(|m| estimate_tokens(&message_text(m)))
                .sum();

            if total_tokens <= cfg.generation.max_context_tokens || attempt >= 1 {
                return Ok(ctx);
            }
            attempt += 1;

            let key = self.session_key(chat_id);
            let summary = self.summarize_for_compaction(&ctx.history);
            let keep_recent = cfg.generation.history_messages / 3;
            self.sessions
                .compact(&key, keep_recent.max(1), &summary)
                .map_err(|e| amicus_core::AmicusError::Internal(format!("compaction failed: {e}")))?;
        }
    }

    fn build_once(
        &self,
        cfg: &AmicusConfig,
        chat_id: &ChatId,
        is_group: bool,
        trust: TrustTier,
        messages: &[IncomingMessage],
        behavior_override: Option<&str>,
    ) -> amicus_core::Result<BuiltContext> {
        let system = self.build_system(cfg, is_group, trust, behavior_override);

        let source_ids: Vec<String> = messages.iter().map(|m| m.message_id.to_string()).collect();
        let key = self.session_key(chat_id);
        let history_rows = self
            .sessions
            .get_history_excluding(&key, cfg.generation.history_messages, &source_ids)
            .map_err(|e| amicus_core::AmicusError::Internal(format!("session history read failed: {e}")))?;
        let history = history_rows
            .into_iter()
            .map(|m| BackendMessage::text(role_str(m.role), m.content))
            .collect();

        let data_messages = self.build_data_messages(cfg, chat_id, messages);
        let user_messages = self.build_user_messages(is_group, messages);

        Ok(BuiltContext {
            system,
            data_messages,
            history,
            user_messages,
        })
    }

    fn build_system(
        &self,
        cfg: &AmicusConfig,
        is_group: bool,
        trust: TrustTier,
        behavior_override: Option<&str>,
    ) -> SystemPrompt {
        let mut prompt = self.prompt.build_prompt(None, Some(&SessionInfo {
            session_key: "turn".to_string(),
            turn_count: 0,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }));

        let mut policy = String::new();
        if let Some(ov) = behavior_override {
            policy.push_str(ov);
            policy.push('\n');
        }
        if is_group {
            policy.push_str("You are in a group chat; keep replies to one line.\n");
        }
        policy.push_str(&format!(
            "Channel policy: max {} characters per reply. Recipient trust tier: {}.\n",
            cfg.quality.max_chars, trust
        ));
        if !cfg.agent.anti_patterns.is_empty() {
            policy.push_str("Never use these phrases: ");
            policy.push_str(&cfg.agent.anti_patterns.join(", "));
            policy.push('\n');
        }

        prompt.volatile_tier = format!("{}\n\n{}", policy, prompt.volatile_tier);
        prompt
    }

    /// Data messages: persona capsules of active participants, group
    /// capsule, retrieved facts/episodes, bounded by
    /// `cfg.generation.data_messages_max_tokens` (§4.G).
    fn build_data_messages(
        &self,
        cfg: &AmicusConfig,
        chat_id: &ChatId,
        messages: &[IncomingMessage],
    ) -> Vec<BackendMessage> {
        let mut budget = cfg.generation.data_messages_max_tokens;
        let mut sections: Vec<String> = Vec::new();

        if let Ok(Some(capsule)) = self.memory.get_group_capsule(chat_id.as_str()) {
            if let Some(text) = capsule.capsule {
                push_bounded(&mut sections, &mut budget, "Group context", &text);
            }
        }

        let mut seen_people = std::collections::HashSet::new();
        for msg in messages {
            if !seen_people.insert(msg.author_id.clone()) {
                continue;
            }
            if let Ok(Some(person)) = self
                .memory
                .find_person_by_identity(msg.channel.as_str(), &msg.author_id)
            {
                if let Some(capsule) = person.capsule {
                    let label = format!(
                        "About {}",
                        person.display_name.clone().unwrap_or(msg.author_id.clone())
                    );
                    push_bounded(&mut sections, &mut budget, &label, &capsule);
                }
            }
        }

        let query: String = messages.iter().map(|m| m.user_text()).collect::<Vec<_>>().join(" ");
        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Ok(facts) = self.memory.hybrid_search_facts(cfg, &query, 5, now_ms) {
            if !facts.is_empty() {
                let text = facts
                    .iter()
                    .map(|h| format!("- {}: {}", h.item.subject, h.item.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                push_bounded(&mut sections, &mut budget, "Known facts", &text);
            }
        }
        if let Ok(episodes) = self.memory.hybrid_search_episodes(cfg, &query, 5, now_ms) {
            if !episodes.is_empty() {
                let text = episodes
                    .iter()
                    .map(|h| format!("- {}", h.item.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                push_bounded(&mut sections, &mut budget, "Related past moments", &text);
            }
        }

        if sections.is_empty() {
            return Vec::new();
        }
        vec![BackendMessage::text("user", sections.join("\n\n"))]
    }

    /// One entry per batch item (§4.G). Group messages get
    /// `[displayName or authorId]` prefixes so the model can tell speakers
    /// apart.
    fn build_user_messages(&self, is_group: bool, messages: &[IncomingMessage]) -> Vec<BackendMessage> {
        messages
            .iter()
            .map(|m| {
                let text = m.user_text();
                let content = if is_group {
                    let who = m.author_display_name.clone().unwrap_or_else(|| m.author_id.clone());
                    format!("[{who}] {text}")
                } else {
                    text
                };
                BackendMessage::text("user", content)
            })
            .collect()
    }

    fn summarize_for_compaction(&self, history: &[BackendMessage]) -> String {
        let joined: String = history
            .iter()
            .map(|m| format!("{}: {}", m.role, message_text(m)))
            .collect::<Vec<_>>()
            .join("\n");
        let clipped: String = joined.chars().take(2000).collect();
        format!("Earlier conversation summary (compacted):\n{clipped}")
    }
}

fn push_bounded(sections: &mut Vec<String>, budget: &mut u32, label: &str, text: &str) {
    let cost = estimate_tokens(text);
    if cost > *budget {
        return;
    }
    *budget -= cost;
    sections.push(format!("{label}: {text}"));
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "user",
    }
}

fn message_text(m: &BackendMessage) -> String {
    match &m.content {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_is_roughly_chars_over_four() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn push_bounded_skips_when_over_budget() {
        let mut sections = Vec::new();
        let mut budget = 1u32;
        push_bounded(&mut sections, &mut budget, "Big", &"x".repeat(1000));
        assert!(sections.is_empty());
    }

    #[test]
    fn push_bounded_consumes_budget_on_success() {
        let mut sections = Vec::new();
        let mut budget = 100u32;
        push_bounded(&mut sections, &mut budget, "Small", "hi");
        assert_eq!(sections.len(), 1);
        assert!(budget < 100);
    }
}
