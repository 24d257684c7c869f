use std::time::Instant;

use amicus_core::config::{BehaviorConfig, SleepConfig};
use amicus_core::{ChatId, Mentioned, TrustTier};
use amicus_memory::manager::MemoryManager;
use amicus_memory::types::Episode;
use chrono::{DateTime, NaiveTime, Utc};
use dashmap::DashMap;
use rand::Rng;

/// Half-life used by the engagement-roll heat formula (§4.D.6).
const HEAT_HALF_LIFE_SECS: f64 = 300.0;

/// Marker prefixed onto an assistant episode's content when the turn was a
/// reaction rather than a sent message, so the domination/heat windows can
/// weight it at 0.25 instead of 1.0 without a dedicated schema column.
pub const REACTION_EPISODE_MARKER: &str = "\u{2022}reaction\u{2022}";

pub fn mark_reaction_episode(emoji: &str) -> String {
    format!("{REACTION_EPISODE_MARKER}{emoji}")
}

fn episode_weight(e: &Episode) -> f64 {
    if e.content.starts_with(REACTION_EPISODE_MARKER) {
        0.25
    } else {
        1.0
    }
}

fn is_assistant_episode(e: &Episode) -> bool {
    e.person_id.is_none()
}

/// How the message addresses the agent, independent of the channel's own
/// `mentioned` flag — derived from the literal text (does it name the
/// agent, does it end in a question mark, does it carry a link).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    MentionedQuestion,
    MentionedCasual,
    HasLink,
    General,
}

impl MessageClass {
    pub fn classify(named_in_text: bool, has_question_mark: bool, has_link: bool) -> Self {
        if named_in_text && has_question_mark {
            MessageClass::MentionedQuestion
        } else if named_in_text {
            MessageClass::MentionedCasual
        } else if has_link {
            MessageClass::HasLink
        } else {
            MessageClass::General
        }
    }

    /// `(send_cold, send_hot, react_cold, react_hot)` — §4.D.6 gives exact
    /// numbers for `has_link`/`general`; the two `mentioned_*` classes are
    /// not in the interpolation table the spec hands us, only that textual
    /// self-address should engage more readily than an unaddressed message.
    /// Resolved (see DESIGN.md): scale both up proportionally, keeping the
    /// same cold→hot decay shape as the specified classes.
    fn send_react_range(self) -> (f64, f64, f64, f64) {
        match self {
            MessageClass::General => (0.08, 0.03, 0.20, 0.12),
            MessageClass::HasLink => (0.08, 0.04, 0.12, 0.08),
            MessageClass::MentionedCasual => (0.30, 0.15, 0.25, 0.15),
            MessageClass::MentionedQuestion => (0.50, 0.30, 0.30, 0.20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BehaviorDecision {
    Send,
    /// Engagement roll landed on "react" — caller must run the LLM-assisted
    /// single-emoji contract (§4.D.7) and fall back to
    /// `silence("react_parse_fail")` on parse failure.
    WantsReaction,
    Silence(&'static str),
}

impl BehaviorDecision {
    pub fn is_silence(self) -> bool {
        matches!(self, BehaviorDecision::Silence(_))
    }
}

/// Extra, text-derived signals the caller must supply alongside the channel's
/// own `mentioned` flag — these come from scanning the merged batch text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSignals {
    pub named_in_text: bool,
    pub has_question_mark: bool,
    pub has_link: bool,
}

/// Tracks per-chat reply heat and applies the non-generative gates ahead of
/// the generation loop (§4.D): sleep window, not-mentioned, thread lock,
/// domination, velocity, engagement roll, random skip. Operators always
/// bypass gates 1, 4, 5, 6, 8 (not 2, 3, 7).
#[derive(Default)]
pub struct BehaviorEngine {
    last_reply: DashMap<ChatId, Instant>,
}

impl BehaviorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once the agent actually sends a reply or reaction into `chat_id`,
    /// so later heat/Δt calculations see it. The outbound `Episode` itself
    /// (logged by the caller in the commit step, §4.J.12) carries the weight
    /// information via [`mark_reaction_episode`].
    pub fn record_reply(&self, chat_id: &ChatId, now: Instant) {
        self.last_reply.insert(chat_id.clone(), now);
    }

    fn seconds_since_last_reply(&self, chat_id: &ChatId, now: Instant) -> f64 {
        self.last_reply
            .get(chat_id)
            .map(|t| now.duration_since(*t).as_secs_f64())
            .unwrap_or(f64::INFINITY)
    }

    /// Whether `now_utc` falls inside the configured sleep window, evaluated
    /// in the configured local timezone. A window that wraps midnight
    /// (`start_local > end_local`) is treated as spanning the date boundary.
    pub fn is_sleeping(cfg: &SleepConfig, now_utc: DateTime<Utc>) -> bool {
        if !cfg.enabled {
            return false;
        }
        let tz: chrono_tz::Tz = cfg.timezone.parse().unwrap_or(chrono_tz::UTC);
        let local_time = now_utc.with_timezone(&tz).time();
        let (Some(start), Some(end)) = (parse_hm(&cfg.start_local), parse_hm(&cfg.end_local)) else {
            return false;
        };
        if start <= end {
            local_time >= start && local_time < end
        } else {
            local_time >= start || local_time < end
        }
    }

    /// Group-size-dependent domination threshold (§4.D.4).
    fn domination_threshold(group_size: usize) -> f64 {
        if group_size <= 4 {
            0.30
        } else if group_size <= 7 {
            0.20
        } else {
            0.15
        }
    }

    /// `ourShare` over the last `window` weighted episodes: assistant weight
    /// (1.0 send, 0.25 reaction) divided by total weight. Returns `0.0` when
    /// the window is empty.
    fn our_share(episodes: &[Episode]) -> f64 {
        if episodes.is_empty() {
            return 0.0;
        }
        let mut assistant_w = 0.0;
        let mut total_w = 0.0;
        for e in episodes {
            let w = episode_weight(e);
            total_w += w;
            if is_assistant_episode(e) {
                assistant_w += w;
            }
        }
        if total_w <= 0.0 {
            0.0
        } else {
            assistant_w / total_w
        }
    }

    /// Thread-lock check (§4.D.3): the last 8 user+assistant episodes show
    /// only 2 distinct participants (one of them the assistant), yet the
    /// chat's longer history shows at least 3 distinct participants —
    /// i.e. the conversation has narrowed to a 1:1 exchange with the agent
    /// inside a group that is otherwise active. Bypassed by a direct mention
    /// ending in a question mark.
    fn thread_locked(last8: &[Episode], longer_history: &[Episode]) -> bool {
        if last8.len() < 8 {
            return false;
        }
        let mut participants = std::collections::HashSet::new();
        let mut assistant_present = false;
        for e in last8 {
            match &e.person_id {
                Some(pid) => {
                    participants.insert(pid.clone());
                }
                None => assistant_present = true,
            }
        }
        if !assistant_present || participants.len() != 1 {
            return false;
        }
        let distinct_in_history: std::collections::HashSet<_> = longer_history
            .iter()
            .filter_map(|e| e.person_id.clone())
            .collect();
        distinct_in_history.len() >= 3
    }

    /// Top-level gate invoked before the generation loop runs for a batch
    /// (§4.D). Pulls its own 8/20-episode windows from `memory` — callers
    /// don't need to precompute them.
    #[allow(clippy::too_many_arguments)]
    pub fn decide(
        &self,
        cfg: &BehaviorConfig,
        memory: &MemoryManager,
        chat_id: &ChatId,
        group_size: usize,
        is_group: bool,
        is_operator: bool,
        mentioned: Mentioned,
        text: TextSignals,
        distinct_authors_in_window: usize,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> BehaviorDecision {
        // 1. Sleep window — operator bypasses.
        if !is_operator && Self::is_sleeping(&cfg.sleep, now_utc) {
            return BehaviorDecision::Silence("sleep_mode");
        }

        if !is_group {
            return BehaviorDecision::Send;
        }

        // 2. Explicit not-mentioned — no operator bypass.
        if mentioned.is_explicitly_no() {
            return BehaviorDecision::Silence("not_mentioned");
        }

        let direct_mention_with_question = mentioned.is_yes() && text.has_question_mark;

        // 3. Thread lock — no operator bypass, but direct mention + '?' bypasses.
        let recent20 = memory
            .recent_episodes_for_chat(chat_id.as_str(), 20)
            .unwrap_or_default();
        let last8: Vec<Episode> = recent20.iter().take(8).cloned().collect();
        if !direct_mention_with_question && Self::thread_locked(&last8, &recent20) {
            return BehaviorDecision::Silence("thread_lock");
        }

        if mentioned.is_yes() {
            return BehaviorDecision::Send;
        }

        // 4. Domination check — operator bypasses.
        let our_share = Self::our_share(&recent20);
        let threshold = Self::domination_threshold(group_size.max(1));
        if !is_operator && our_share > threshold {
            return BehaviorDecision::Silence("domination_check");
        }

        // 5. Velocity — operator bypasses.
        if !is_operator && distinct_authors_in_window >= cfg.velocity_min_authors {
            return BehaviorDecision::Silence("velocity_skip");
        }

        // 6. Engagement roll — operator bypasses (never mentioned==true here,
        // since that returned above).
        if is_operator {
            return BehaviorDecision::Send;
        }

        let delta_t = self.seconds_since_last_reply(chat_id, now);
        let heat = (our_share / threshold).clamp(0.0, 1.0) * (-delta_t / HEAT_HALF_LIFE_SECS).exp();

        let class = MessageClass::classify(text.named_in_text, text.has_question_mark, text.has_link);
        let (send_cold, send_hot, react_cold, react_hot) = class.send_react_range();
        let p_send = lerp(send_cold, send_hot, heat);
        let mut p_react = lerp(react_cold, react_hot, heat);

        let target = 1.0 / group_size.max(1) as f64;
        let p_send = if our_share > target && our_share > 0.0 {
            p_send * (target / our_share).clamp(0.0, 1.0)
        } else {
            p_send
        };
        p_react = p_react.clamp(0.0, 1.0);

        let roll: f64 = rand::thread_rng().gen();
        let decision = if roll < p_send {
            BehaviorDecision::Send
        } else if roll < p_send + p_react {
            // 7. LLM-assisted reaction is the caller's job.
            BehaviorDecision::WantsReaction
        } else {
            BehaviorDecision::Silence("engagement_silence")
        };

        if decision != BehaviorDecision::Send && decision != BehaviorDecision::WantsReaction {
            return decision;
        }

        // 8. Random skip — operator bypasses, only applies when not explicitly mentioned.
        if !mentioned.is_yes() && rand::thread_rng().gen::<f64>() < cfg.random_skip_rate {
            return BehaviorDecision::Silence("random_skip");
        }

        decision
    }
}

fn lerp(cold: f64, hot: f64, heat: f64) -> f64 {
    cold + (hot - cold) * heat.clamp(0.0, 1.0)
}

fn parse_hm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use amicus_memory::db::init_db;
    use chrono::TimeZone;
    use rusqlite::Connection;
    use std::path::PathBuf;

    fn mem() -> MemoryManager {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        MemoryManager::new(conn, None, PathBuf::from("/tmp/amicus-behavior-test"))
    }

    fn sleep_cfg(start: &str, end: &str) -> SleepConfig {
        SleepConfig {
            enabled: true,
            start_local: start.to_string(),
            end_local: end.to_string(),
            timezone: "UTC".to_string(),
        }
    }

    #[test]
    fn sleep_window_wraps_midnight() {
        let cfg = sleep_cfg("23:00", "07:00");
        let midnight = Utc.with_ymd_and_hms(2026, 1, 1, 0, 30, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert!(BehaviorEngine::is_sleeping(&cfg, midnight));
        assert!(!BehaviorEngine::is_sleeping(&cfg, noon));
    }

    #[test]
    fn dm_always_proceeds_regardless_of_mentioned() {
        let engine = BehaviorEngine::new();
        let m = mem();
        let cfg = BehaviorConfig::default();
        let decision = engine.decide(
            &cfg, &m, &ChatId::from("c1"), 1, false, false, Mentioned::No,
            TextSignals::default(), 0, Instant::now(), Utc::now(),
        );
        assert_eq!(decision, BehaviorDecision::Send);
    }

    #[test]
    fn explicit_not_mentioned_group_message_silences() {
        let engine = BehaviorEngine::new();
        let m = mem();
        let cfg = BehaviorConfig::default();
        let decision = engine.decide(
            &cfg, &m, &ChatId::from("c1"), 5, true, false, Mentioned::No,
            TextSignals::default(), 0, Instant::now(), Utc::now(),
        );
        assert_eq!(decision, BehaviorDecision::Silence("not_mentioned"));
    }

    #[test]
    fn operator_not_mentioned_group_message_still_silences() {
        let engine = BehaviorEngine::new();
        let m = mem();
        let cfg = BehaviorConfig::default();
        let decision = engine.decide(
            &cfg, &m, &ChatId::from("c1"), 5, true, true, Mentioned::No,
            TextSignals::default(), 0, Instant::now(), Utc::now(),
        );
        assert_eq!(decision, BehaviorDecision::Silence("not_mentioned"));
    }

    #[test]
    fn explicit_mention_bypasses_domination_and_velocity() {
        let engine = BehaviorEngine::new();
        let m = mem();
        let cfg = BehaviorConfig::default();
        let decision = engine.decide(
            &cfg, &m, &ChatId::from("c1"), 5, true, false, Mentioned::Yes,
            TextSignals::default(), 99, Instant::now(), Utc::now(),
        );
        assert_eq!(decision, BehaviorDecision::Send);
    }

    #[test]
    fn velocity_silences_unknown_mention_group_message() {
        let engine = BehaviorEngine::new();
        let m = mem();
        let mut cfg = BehaviorConfig::default();
        cfg.velocity_min_authors = 2;
        let decision = engine.decide(
            &cfg, &m, &ChatId::from("c1"), 5, true, false, Mentioned::Unknown,
            TextSignals::default(), 5, Instant::now(), Utc::now(),
        );
        assert_eq!(decision, BehaviorDecision::Silence("velocity_skip"));
    }

    #[test]
    fn thread_lock_silences_narrowed_conversation() {
        let engine = BehaviorEngine::new();
        let m = mem();
        let cfg = BehaviorConfig::default();
        let chat = ChatId::from("c1");

        // Longer history: 3 distinct participants plus the assistant.
        for (i, person) in ["p1", "p2", "p3"].iter().enumerate() {
            m.log_episode(
                &Episode {
                    id: format!("hist{i}"),
                    chat_id: chat.to_string(),
                    person_id: Some(person.to_string()),
                    is_group: Some(true),
                    content: "hi".into(),
                    created_at_ms: i as i64,
                },
                i as i64,
            )
            .unwrap();
        }
        // Last 8 episodes: only p1 and the assistant alternate.
        for i in 0..8 {
            let (person_id, content) = if i % 2 == 0 {
                (Some("p1".to_string()), "hey".to_string())
            } else {
                (None, "sup".to_string())
            };
            m.log_episode(
                &Episode {
                    id: format!("recent{i}"),
                    chat_id: chat.to_string(),
                    person_id,
                    is_group: Some(true),
                    content,
                    created_at_ms: 100 + i as i64,
                },
                100 + i as i64,
            )
            .unwrap();
        }

        let decision = engine.decide(
            &cfg, &m, &chat, 5, true, false, Mentioned::Unknown,
            TextSignals::default(), 0, Instant::now(), Utc::now(),
        );
        assert_eq!(decision, BehaviorDecision::Silence("thread_lock"));
    }

    #[test]
    fn direct_mention_with_question_bypasses_thread_lock() {
        let engine = BehaviorEngine::new();
        let m = mem();
        let cfg = BehaviorConfig::default();
        let chat = ChatId::from("c1");
        for i in 0..8 {
            let (person_id, content) = if i % 2 == 0 {
                (Some("p1".to_string()), "hey".to_string())
            } else {
                (None, "sup".to_string())
            };
            m.log_episode(
                &Episode {
                    id: format!("recent{i}"),
                    chat_id: chat.to_string(),
                    person_id,
                    is_group: Some(true),
                    content,
                    created_at_ms: i as i64,
                },
                i as i64,
            )
            .unwrap();
        }
        for (i, person) in ["p2", "p3"].iter().enumerate() {
            m.log_episode(
                &Episode {
                    id: format!("hist{i}"),
                    chat_id: chat.to_string(),
                    person_id: Some(person.to_string()),
                    is_group: Some(true),
                    content: "hi".into(),
                    created_at_ms: i as i64,
                },
                i as i64,
            )
            .unwrap();
        }

        let decision = engine.decide(
            &cfg, &m, &chat, 5, true, false, Mentioned::Yes,
            TextSignals { named_in_text: true, has_question_mark: true, has_link: false },
            0, Instant::now(), Utc::now(),
        );
        assert_eq!(decision, BehaviorDecision::Send);
    }

    #[test]
    fn domination_silences_when_over_share() {
        let engine = BehaviorEngine::new();
        let m = mem();
        let mut cfg = BehaviorConfig::default();
        cfg.random_skip_rate = 0.0;
        let chat = ChatId::from("c1");
        // 20 episodes, 15 of them assistant-authored sends -> ourShare = 0.75 > any threshold.
        for i in 0..20 {
            let person_id = if i < 15 { None } else { Some("p1".to_string()) };
            m.log_episode(
                &Episode {
                    id: format!("e{i}"),
                    chat_id: chat.to_string(),
                    person_id,
                    is_group: Some(true),
                    content: "msg".into(),
                    created_at_ms: i as i64,
                },
                i as i64,
            )
            .unwrap();
        }
        let decision = engine.decide(
            &cfg, &m, &chat, 10, true, false, Mentioned::Unknown,
            TextSignals::default(), 0, Instant::now(), Utc::now(),
        );
        assert_eq!(decision, BehaviorDecision::Silence("domination_check"));
    }
}
