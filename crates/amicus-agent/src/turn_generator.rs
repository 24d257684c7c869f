//! Wires the context builder, generation loop, and quality gate into the
//! two seams `amicus-turn` drives against: [`Generator`] for inbound
//! batches and [`ProactiveGenerator`] for scheduler-fired triggers.

use std::sync::Arc;

use amicus_core::config::AmicusConfig;
use amicus_core::{ChatId, OutgoingAction};
use amicus_memory::feedback::FeedbackStore;
use amicus_memory::manager::MemoryManager;
use amicus_memory::types::Episode;
use amicus_scheduler::SchedulerHandle;
use amicus_sessions::manager::SessionManager;
use amicus_sessions::types::{MessageRole, SessionKey};
use amicus_turn::engine::{Generator, TurnBatch};
use amicus_turn::proactive::{ProactiveGenerator, ProactiveKind, ProactiveTrigger};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{BackendMessage, BackendRole, LLMBackend, ObjectRequest};
use crate::context::ContextBuilder;
use crate::generation::{extract_verified_urls, generate_disciplined_reply, GenerationRequest};
use crate::quality::{gate_outgoing_text, GateRequest, MessageKind};
use crate::tools::build::build_tools;

pub struct TurnGenerator {
    cfg: Arc<AmicusConfig>,
    backend: Arc<dyn LLMBackend>,
    memory: Arc<MemoryManager>,
    sessions: Arc<SessionManager>,
    scheduler: Arc<SchedulerHandle>,
    context: ContextBuilder,
    feedback: Option<Arc<FeedbackStore>>,
}

impl TurnGenerator {
    pub fn new(
        cfg: Arc<AmicusConfig>,
        backend: Arc<dyn LLMBackend>,
        memory: Arc<MemoryManager>,
        sessions: Arc<SessionManager>,
        scheduler: Arc<SchedulerHandle>,
        context: ContextBuilder,
    ) -> Self {
        Self { cfg, backend, memory, sessions, scheduler, context, feedback: None }
    }

    /// Attaches the quality-gate rejection log (`database.feedback_path`)
    /// used by the `self-improve` CLI command. Optional — a generator with
    /// no feedback store simply doesn't record rejections.
    pub fn with_feedback(mut self, feedback: Arc<FeedbackStore>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    fn session_key(&self, chat_id: &ChatId) -> SessionKey {
        SessionKey::new(chat_id.as_str(), "amicus", "main")
    }

    fn record_rejection(&self, chat_id: &ChatId, reason: &str) {
        if let Some(feedback) = &self.feedback {
            let now_ms = chrono::Utc::now().timestamp_millis();
            if let Err(e) = feedback.record_rejection(reason, chat_id.as_str(), now_ms) {
                tracing::warn!(%e, "failed to record quality-gate rejection");
            }
        }
    }

    fn persona_voice_summary(&self) -> String {
        format!("{} (see persona identity)", self.cfg.agent.name)
    }

    /// LLM-assisted reaction-emoji pick for the "wants reaction only" path
    /// (§4.D.7). Falls back to `silence("react_parse_fail")` if the model
    /// can't be coaxed into a single emoji.
    async fn pick_reaction(&self, batch: &TurnBatch) -> amicus_core::Result<OutgoingAction> {
        let Some(last) = batch.messages.last() else {
            return Ok(OutgoingAction::silence("react_parse_fail"));
        };
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "emoji": { "type": "string", "description": "A single emoji character, nothing else." }
            },
            "required": ["emoji"]
        });
        let req = ObjectRequest {
            role: BackendRole::Fast,
            system: format!(
                "You are {}. Pick one emoji to react to the user's last message with, matching its \
                 tone. Respond only via the tool call.",
                self.cfg.agent.name
            ),
            messages: vec![BackendMessage::text("user", last.user_text())],
            schema_name: "emoji_reaction".to_string(),
            schema,
        };

        let Ok(resp) = self.backend.complete_object(req).await else {
            return Ok(OutgoingAction::silence("react_parse_fail"));
        };
        let Some(emoji) = resp.output.get("emoji").and_then(|v| v.as_str()) else {
            return Ok(OutgoingAction::silence("react_parse_fail"));
        };
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.chars().count() > 4 {
            return Ok(OutgoingAction::silence("react_parse_fail"));
        }

        let episode = Episode {
            id: Uuid::now_v7().to_string(),
            chat_id: batch.chat_id.to_string(),
            person_id: None,
            is_group: Some(batch.is_group),
            content: amicus_turn::behavior::mark_reaction_episode(emoji),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        let _ = self.memory.log_episode(&episode, episode.created_at_ms);

        Ok(OutgoingAction::React {
            emoji: emoji.to_string(),
            target_author_id: last.author_id.clone(),
            target_timestamp_ms: last.timestamp_ms,
        })
    }

    fn persist_turn(&self, chat_id: &ChatId, batch_text: &str, reply_text: Option<&str>) {
        let key = self.session_key(chat_id);
        if let Err(e) = self.sessions.append_message(&key, MessageRole::User, batch_text, None) {
            tracing::warn!(%e, "failed to persist user turn");
        }
        if let Some(text) = reply_text {
            if let Err(e) = self.sessions.append_message(&key, MessageRole::Assistant, text, None) {
                tracing::warn!(%e, "failed to persist assistant turn");
            }
            let episode = Episode {
                id: Uuid::now_v7().to_string(),
                chat_id: chat_id.to_string(),
                person_id: None,
                is_group: None,
                content: text.to_string(),
                created_at_ms: chrono::Utc::now().timestamp_millis(),
            };
            let _ = self.memory.log_episode(&episode, episode.created_at_ms);
        }
    }
}

#[async_trait]
impl Generator for TurnGenerator {
    async fn generate(&self, batch: TurnBatch) -> amicus_core::Result<OutgoingAction> {
        if batch.wants_reaction_only {
            return self.pick_reaction(&batch).await;
        }

        let behavior_override = if batch.is_group {
            Some("You are in a group chat; keep it one line.")
        } else {
            None
        };

        let built = self
            .context
            .build(&self.cfg, &batch.chat_id, batch.is_group, batch.trust, &batch.messages, behavior_override)
            .await?;

        let merged_text: String = batch.messages.iter().map(|m| m.user_text()).collect::<Vec<_>>().join(" ");
        let verified_urls = extract_verified_urls(&merged_text);

        let recipient_channel = batch.messages.first().map(|m| m.channel.to_string());
        let recipient_user_id = batch.messages.last().map(|m| m.author_id.clone());
        let tools = build_tools(
            Arc::clone(&self.memory),
            Arc::clone(&self.cfg),
            Arc::clone(&self.scheduler),
            batch.chat_id.clone(),
            recipient_channel,
            recipient_user_id,
        );

        let system_text = built.system.to_plain_text();
        let gen_req = GenerationRequest {
            system: system_text,
            messages: built.into_messages(),
            verified_urls,
            is_group: batch.is_group,
        };

        let signal = CancellationToken::new();
        let outcome = generate_disciplined_reply(&self.cfg, &self.backend, &tools, gen_req, &signal).await?;

        let Some(draft) = outcome.text else {
            let reason = outcome.reason.unwrap_or_else(|| "model_silence".into());
            self.record_rejection(&batch.chat_id, &reason);
            self.persist_turn(&batch.chat_id, &merged_text, None);
            return Ok(OutgoingAction::silence(reason));
        };

        let gate_req = GateRequest {
            draft,
            kind: MessageKind::Reply,
            max_chars: self.cfg.quality.max_chars,
            is_group: batch.is_group,
            identity_anti_patterns: self.cfg.agent.anti_patterns.clone(),
            max_sentences: Some(self.cfg.quality.max_sentences),
            persona_voice_summary: self.persona_voice_summary(),
        };
        let gated = gate_outgoing_text(gate_req, &self.backend).await;

        match gated.text {
            Some(text) => {
                self.persist_turn(&batch.chat_id, &merged_text, Some(&text));
                Ok(OutgoingAction::SendText { text, media: None, tts_hint: None })
            }
            None => {
                let reason = gated.reason.unwrap_or_else(|| "quality_gate_fail".into());
                self.record_rejection(&batch.chat_id, &reason);
                self.persist_turn(&batch.chat_id, &merged_text, None);
                Ok(OutgoingAction::silence(reason))
            }
        }
    }
}

#[async_trait]
impl ProactiveGenerator for TurnGenerator {
    async fn generate(&self, trigger: ProactiveTrigger) -> amicus_core::Result<OutgoingAction> {
        let draft = match trigger.kind {
            ProactiveKind::Reminder => trigger
                .payload
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("Just checking in, per your reminder.")
                .to_string(),
            ProactiveKind::Birthday | ProactiveKind::CheckIn => {
                let system = format!(
                    "You are {}. Write a short, warm proactive message for this occasion: {:?}. \
                     Stay in character.",
                    self.cfg.agent.name, trigger.kind
                );
                let req = crate::backend::CompleteRequest {
                    role: BackendRole::Default,
                    system,
                    messages: vec![BackendMessage::text(
                        "user",
                        trigger.payload.to_string(),
                    )],
                    tools: Vec::new(),
                    max_steps: 1,
                    max_tokens: self.cfg.generation.max_output_tokens,
                };
                let signal = CancellationToken::new();
                match self.backend.complete(req, None, &signal).await {
                    Ok(resp) if !resp.text.trim().is_empty() => resp.text,
                    _ => return Ok(OutgoingAction::silence("model_silence")),
                }
            }
        };

        let gate_req = GateRequest {
            draft,
            kind: MessageKind::Proactive,
            max_chars: self.cfg.quality.max_chars,
            is_group: false,
            identity_anti_patterns: self.cfg.agent.anti_patterns.clone(),
            max_sentences: Some(self.cfg.quality.max_sentences),
            persona_voice_summary: self.persona_voice_summary(),
        };
        let gated = gate_outgoing_text(gate_req, &self.backend).await;

        match gated.text {
            Some(text) => {
                self.persist_turn(&trigger.chat_id, "[proactive trigger]", Some(&text));
                Ok(OutgoingAction::SendText { text, media: None, tts_hint: None })
            }
            None => Ok(OutgoingAction::silence(gated.reason.unwrap_or_else(|| "quality_gate_fail".into()))),
        }
    }
}
