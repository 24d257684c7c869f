use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use amicus_core::config::AmicusConfig;
use amicus_core::{AmicusError, ChatId, IncomingMessage, MessageId, OutgoingAction, TrustTier};
use amicus_memory::manager::{derive_trust_tier, MemoryManager};
use async_trait::async_trait;
use dashmap::DashMap;

use crate::accumulator::{merged_mentioned, Accumulator};
use crate::behavior::{BehaviorDecision, BehaviorEngine, TextSignals};
use crate::error::{Result, TurnError};
use crate::lock::ChatLocks;
use crate::rate_limit::RateLimiter;

/// A debounced batch of inbound messages, ready for the generation loop.
pub struct TurnBatch {
    pub chat_id: ChatId,
    pub is_group: bool,
    pub is_operator: bool,
    pub trust: TrustTier,
    /// Set when the pre-draft gate's engagement roll landed on "react"
    /// instead of "send" (§4.D.6-7): the generator must produce a single
    /// reaction emoji rather than a full reply, and silence
    /// (`react_parse_fail`) if it can't parse one out of the model.
    pub wants_reaction_only: bool,
    pub messages: Vec<IncomingMessage>,
}

/// Implemented by whatever runs the generation loop (§4.E-H). The turn
/// engine only decides *whether* to call this; what happens inside is out
/// of its concern.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, batch: TurnBatch) -> amicus_core::Result<OutgoingAction>;
}

/// Scans merged batch text for the text-derived signals the behavior engine
/// needs on top of the channel's own `mentioned` flag (§4.D.6).
fn scan_text_signals(text: &str, agent_name: &str) -> TextSignals {
    let lower = text.to_lowercase();
    TextSignals {
        named_in_text: !agent_name.is_empty() && lower.contains(&agent_name.to_lowercase()),
        has_question_mark: text.contains('?'),
        has_link: lower.contains("http://") || lower.contains("https://"),
    }
}

/// Orchestrates one inbound message end-to-end (§4.J): accumulate, lock,
/// rate-limit, gate through the behavior engine, generate, and detect
/// staleness before handing the result back to the channel adapter.
pub struct TurnEngine {
    accumulator: Accumulator,
    locks: ChatLocks,
    rate_limiter: RateLimiter,
    behavior: BehaviorEngine,
    latest_seen_ms: DashMap<ChatId, AtomicI64>,
    last_proactive_sent: DashMap<ChatId, Instant>,
    seen_messages: DashMap<(ChatId, MessageId), Instant>,
}

/// Window invariant #1 holds over: the same `(chatId, messageId)` delivered
/// twice inside this window silences the second delivery.
const DUPLICATE_WINDOW: Duration = Duration::from_secs(600);

impl TurnEngine {
    pub fn new(cfg: &AmicusConfig) -> Self {
        Self {
            accumulator: Accumulator::new(cfg.debounce.debounce_ms, cfg.debounce.max_multiplier),
            locks: ChatLocks::new(),
            rate_limiter: RateLimiter::new(
                cfg.rate_limit.global_capacity,
                cfg.rate_limit.global_refill_per_second,
                cfg.rate_limit.per_chat_capacity,
                cfg.rate_limit.per_chat_refill_per_second,
                cfg.rate_limit.bucket_ttl_secs,
            ),
            behavior: BehaviorEngine::new(),
            latest_seen_ms: DashMap::new(),
            last_proactive_sent: DashMap::new(),
            seen_messages: DashMap::new(),
        }
    }

    /// Checks and records `(chatId, messageId)` for the duplicate-delivery
    /// invariant (§8 invariant 1). Returns `true` the first time a key is
    /// seen within [`DUPLICATE_WINDOW`]; subsequent deliveries within the
    /// window return `false` without re-inserting.
    fn first_delivery(&self, chat_id: &ChatId, message_id: &MessageId) -> bool {
        let key = (chat_id.clone(), message_id.clone());
        let now = Instant::now();
        if let Some(seen_at) = self.seen_messages.get(&key) {
            if now.duration_since(*seen_at) < DUPLICATE_WINDOW {
                return false;
            }
        }
        self.seen_messages.insert(key, now);
        true
    }

    fn note_seen(&self, chat_id: &ChatId, ts_ms: i64) {
        self.latest_seen_ms
            .entry(chat_id.clone())
            .or_insert_with(|| AtomicI64::new(ts_ms))
            .fetch_max(ts_ms, Ordering::SeqCst);
    }

    fn is_stale(&self, chat_id: &ChatId, my_max_ts: i64) -> bool {
        self.latest_seen_ms
            .get(chat_id)
            .map(|v| v.load(Ordering::SeqCst) > my_max_ts)
            .unwrap_or(false)
    }

    /// Called once per inbound message. Returns `None` if this message was
    /// merged into a batch someone else is already collecting — only the
    /// collector of a given debounce window gets a turn outcome back.
    pub async fn process(
        &self,
        msg: IncomingMessage,
        cfg: &AmicusConfig,
        memory: &MemoryManager,
        generator: &dyn Generator,
    ) -> Option<Result<OutgoingAction>> {
        let chat_id = msg.chat_id.clone();
        let is_operator = msg.is_operator;

        if !self.first_delivery(&chat_id, &msg.message_id) {
            return Some(Ok(OutgoingAction::silence("duplicate_message")));
        }

        self.note_seen(&chat_id, msg.timestamp_ms);

        let batch_msgs = self.accumulator.submit(msg).await?;
        Some(self.run_batch(chat_id, is_operator, batch_msgs, cfg, memory, generator).await)
    }

    async fn run_batch(
        &self,
        chat_id: ChatId,
        is_operator: bool,
        batch_msgs: Vec<IncomingMessage>,
        cfg: &AmicusConfig,
        memory: &MemoryManager,
        generator: &dyn Generator,
    ) -> Result<OutgoingAction> {
        let my_max_ts = batch_msgs.iter().map(|m| m.timestamp_ms).max().unwrap_or(0);
        let is_group = batch_msgs.first().map(|m| m.is_group).unwrap_or(false);
        let mentioned = merged_mentioned(&batch_msgs);

        let guard = self.locks.acquire(&chat_id).await;

        if !is_operator && !self.rate_limiter.try_acquire(&chat_id) {
            return Err(TurnError::RateLimited(chat_id.to_string()));
        }

        let primary_author = batch_msgs.last().map(|m| m.author_id.clone());
        let primary_channel = batch_msgs.first().map(|m| m.channel.to_string());
        let trust = match (primary_channel, primary_author) {
            (Some(channel), Some(author_id)) => memory
                .find_person_by_identity(&channel, &author_id)
                .ok()
                .flatten()
                .map(|p| derive_trust_tier(&p))
                .unwrap_or(TrustTier::NewContact),
            _ => TrustTier::NewContact,
        };

        let distinct_authors = count_recent_distinct_authors(
            memory,
            &chat_id,
            cfg.behavior.velocity_window_secs,
            my_max_ts,
        );
        let group_size = if is_group {
            count_group_participants(memory, &chat_id).max(distinct_authors).max(1)
        } else {
            1
        };
        let merged_text: String = batch_msgs
            .iter()
            .map(|m| m.user_text())
            .collect::<Vec<_>>()
            .join(" ");
        let text_signals = scan_text_signals(&merged_text, &cfg.agent.name);

        let decision = self.behavior.decide(
            &cfg.behavior,
            memory,
            &chat_id,
            group_size,
            is_group,
            is_operator,
            mentioned,
            text_signals,
            distinct_authors,
            Instant::now(),
            chrono::Utc::now(),
        );

        let wants_reaction_only = match decision {
            BehaviorDecision::Silence(reason) => return Ok(OutgoingAction::silence(reason)),
            BehaviorDecision::WantsReaction => true,
            BehaviorDecision::Send => false,
        };

        if self.is_stale(&chat_id, my_max_ts) {
            return Err(TurnError::Core(AmicusError::StaleDiscard));
        }

        let batch = TurnBatch {
            chat_id: chat_id.clone(),
            is_group,
            is_operator,
            trust,
            wants_reaction_only,
            messages: batch_msgs,
        };
        let action = generator.generate(batch).await?;

        if action.is_silence() {
            return Ok(action);
        }

        // Release the lock while we sample and await the human-like delay
        // (§4.J.12, §5: "No task may hold a per-chat lock while awaiting
        // the human-like delay") — another turn for this chat is free to
        // run its own draft phase in the meantime.
        drop(guard);

        let delay_kind = match &action {
            OutgoingAction::React { .. } => crate::delay::DelayKind::React,
            OutgoingAction::SendText { text, .. } => {
                crate::delay::DelayKind::SendText { text_len: text.chars().count() }
            }
            OutgoingAction::Silence { .. } => unreachable!("handled by the is_silence() return above"),
        };
        let delay_ms = crate::delay::sample_human_delay_ms(
            &cfg.delay,
            delay_kind,
            text_signals.has_question_mark,
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        let _guard = self.locks.acquire(&chat_id).await;

        if self.is_stale(&chat_id, my_max_ts) {
            return Err(TurnError::Core(AmicusError::StaleDiscard));
        }

        self.behavior.record_reply(&chat_id, Instant::now());
        Ok(action)
    }

    /// Evicts idle per-chat rate-limit buckets. Intended to run on a slow
    /// interval ticker alongside the process's other background sweeps.
    pub fn sweep_idle(&self) {
        self.rate_limiter.sweep_idle();
        let now = Instant::now();
        self.seen_messages
            .retain(|_, seen_at| now.duration_since(*seen_at) < DUPLICATE_WINDOW);
    }

    /// Runs a scheduler-originated proactive send through the same lock and
    /// rate limiter as an inbound turn (§4.K). A proactive message was never
    /// "addressed", so the velocity/thread-lock/domination/engagement-roll
    /// gates don't apply, but the recipient's trust tier and the sleep
    /// window still gate it: new contacts only get reminders/birthdays,
    /// and "getting to know" recipients are throttled to one proactive send
    /// per 24h.
    pub async fn process_proactive(
        &self,
        chat_id: ChatId,
        cfg: &AmicusConfig,
        memory: &MemoryManager,
        generator: &dyn crate::proactive::ProactiveGenerator,
        trigger: crate::proactive::ProactiveTrigger,
        recipient_is_operator: bool,
    ) -> Result<OutgoingAction> {
        let _guard = self.locks.acquire(&chat_id).await;

        // Sleep check precedes the trust gate for non-operators (§8
        // scenario 6) — a non-exempt proactive event arriving during the
        // sleep window silences as `sleep_mode` even for a `new_contact`
        // recipient, rather than the trust gate's own `proactive_safe_mode`.
        if !recipient_is_operator && BehaviorEngine::is_sleeping(&cfg.behavior.sleep, chrono::Utc::now())
        {
            return Ok(OutgoingAction::silence("sleep_mode"));
        }

        let trust = match (&trigger.recipient_channel, &trigger.recipient_user_id) {
            (Some(channel), Some(user_id)) => memory
                .find_person_by_identity(channel, user_id)
                .ok()
                .flatten()
                .map(|p| derive_trust_tier(&p))
                .unwrap_or(TrustTier::NewContact),
            _ => TrustTier::NewContact,
        };

        if !recipient_is_operator {
            let exempt_from_safe_mode = matches!(
                trigger.kind,
                crate::proactive::ProactiveKind::Reminder | crate::proactive::ProactiveKind::Birthday
            );
            if trust == TrustTier::NewContact && !exempt_from_safe_mode {
                return Ok(OutgoingAction::silence("proactive_safe_mode"));
            }
            if trust == TrustTier::GettingToKnow {
                let throttled = self
                    .last_proactive_sent
                    .get(&chat_id)
                    .map(|t| t.elapsed().as_secs() < 24 * 3600)
                    .unwrap_or(false);
                if throttled {
                    return Ok(OutgoingAction::silence("proactive_warming_throttle"));
                }
            }
        }

        if !self.rate_limiter.try_acquire(&chat_id) {
            return Err(TurnError::RateLimited(chat_id.to_string()));
        }

        let action = generator.generate(trigger).await?;
        if !action.is_silence() {
            self.behavior.record_reply(&chat_id, Instant::now());
            self.last_proactive_sent.insert(chat_id.clone(), Instant::now());
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amicus_core::{Channel, Mentioned};

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, _batch: TurnBatch) -> amicus_core::Result<OutgoingAction> {
            Ok(OutgoingAction::SendText { text: "ok".to_string(), media: None, tts_hint: None })
        }
    }

    fn msg(chat_id: &str, message_id: &str, ts_ms: i64) -> IncomingMessage {
        IncomingMessage {
            channel: Channel::Cli,
            chat_id: ChatId::from(chat_id),
            message_id: MessageId::from(message_id),
            author_id: "alice".to_string(),
            author_display_name: Some("Alice".to_string()),
            text: "hi".to_string(),
            attachments: Vec::new(),
            is_group: false,
            is_operator: false,
            mentioned: Mentioned::Yes,
            timestamp_ms: ts_ms,
        }
    }

    #[tokio::test]
    async fn second_delivery_of_same_message_id_is_silenced_as_duplicate() {
        let cfg = AmicusConfig::default();
        let conn = amicus_memory::db::open(":memory:").unwrap();
        let memory = MemoryManager::new(conn, None, std::env::temp_dir());
        let engine = TurnEngine::new(&cfg);
        let generator = EchoGenerator;

        let first = engine
            .process(msg("cli:dup", "m1", 1_000), &cfg, &memory, &generator)
            .await;
        assert!(matches!(first, Some(Ok(OutgoingAction::SendText { .. }))));

        let second = engine
            .process(msg("cli:dup", "m1", 1_500), &cfg, &memory, &generator)
            .await;
        match second {
            Some(Ok(OutgoingAction::Silence { reason })) => assert_eq!(reason, "duplicate_message"),
            other => panic!("expected duplicate_message silence, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn distinct_message_ids_both_proceed() {
        let cfg = AmicusConfig::default();
        let conn = amicus_memory::db::open(":memory:").unwrap();
        let memory = MemoryManager::new(conn, None, std::env::temp_dir());
        let engine = TurnEngine::new(&cfg);
        let generator = EchoGenerator;

        let first = engine
            .process(msg("cli:dup2", "m1", 1_000), &cfg, &memory, &generator)
            .await;
        let second = engine
            .process(msg("cli:dup2", "m2", 1_200), &cfg, &memory, &generator)
            .await;
        assert!(matches!(first, Some(Ok(OutgoingAction::SendText { .. }))));
        assert!(matches!(second, Some(Ok(OutgoingAction::SendText { .. }))));
    }

    #[test]
    fn sweep_idle_evicts_entries_past_the_duplicate_window() {
        let cfg = AmicusConfig::default();
        let engine = TurnEngine::new(&cfg);
        let chat_id = ChatId::from("cli:sweep");
        let message_id = MessageId::from("m1");
        assert!(engine.first_delivery(&chat_id, &message_id));
        assert!(!engine.first_delivery(&chat_id, &message_id));

        engine
            .seen_messages
            .insert((chat_id.clone(), message_id.clone()), Instant::now() - DUPLICATE_WINDOW * 2);
        engine.sweep_idle();

        assert!(engine.first_delivery(&chat_id, &message_id));
    }
}

fn count_recent_distinct_authors(
    memory: &MemoryManager,
    chat_id: &ChatId,
    window_secs: u64,
    now_ms: i64,
) -> usize {
    let cutoff = now_ms - (window_secs as i64 * 1000);
    memory
        .recent_episodes_for_chat(chat_id.as_str(), 50)
        .map(|episodes| {
            episodes
                .into_iter()
                .filter(|e| e.created_at_ms >= cutoff)
                .filter_map(|e| e.person_id)
                .collect::<std::collections::HashSet<_>>()
                .len()
        })
        .unwrap_or(0)
}

/// Group size isn't a field the spec's data model carries on
/// `IncomingMessage`; it's approximated here as the number of distinct
/// non-assistant participants seen recently in the chat (§4.D.4, Open
/// Question — see DESIGN.md).
fn count_group_participants(memory: &MemoryManager, chat_id: &ChatId) -> usize {
    memory
        .recent_episodes_for_chat(chat_id.as_str(), 100)
        .map(|episodes| {
            episodes
                .into_iter()
                .filter_map(|e| e.person_id)
                .collect::<std::collections::HashSet<_>>()
                .len()
        })
        .unwrap_or(1)
}
