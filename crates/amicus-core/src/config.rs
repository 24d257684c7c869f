use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (amicus.toml + AMICUS_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmicusConfig {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub delay: DelayConfig,
}

impl Default for AmicusConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            agent: AgentConfig::default(),
            database: DatabaseConfig::default(),
            providers: ProvidersConfig::default(),
            channels: ChannelsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            debounce: DebounceConfig::default(),
            behavior: BehaviorConfig::default(),
            quality: QualityConfig::default(),
            memory: MemoryConfig::default(),
            generation: GenerationConfig::default(),
            delay: DelayConfig::default(),
        }
    }
}

impl AmicusConfig {
    /// Resolved data directory, defaulting to `~/.amicus`.
    pub fn data_dir(&self) -> String {
        self.data_dir.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{home}/.amicus")
        })
    }

    /// Load config from a TOML file with AMICUS_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AmicusConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("AMICUS_").split("_"))
            .extract()
            .map_err(|e| crate::error::AmicusError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.amicus/amicus.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_fast_model")]
    pub fast_model: String,
    /// Display name the persona answers to — used to detect whether a group
    /// message textually addresses the agent even when the channel's own
    /// mention flag is unknown (§4.D.6).
    #[serde(default = "default_agent_name")]
    pub name: String,
    pub soul_path: Option<String>,
    /// Operator-configured phrases the persona should never utter (§4.E/§4.F).
    #[serde(default)]
    pub anti_patterns: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            fast_model: default_fast_model(),
            name: default_agent_name(),
            soul_path: None,
            anti_patterns: Vec::new(),
        }
    }
}

fn default_fast_model() -> String {
    "claude-haiku-4-6".to_string()
}

fn default_agent_name() -> String {
    "Amicus".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}

/// Paths for the three SQLite databases, resolved relative to `data_dir`
/// unless given as absolute paths (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_memory_db")]
    pub memory_path: String,
    #[serde(default = "default_sessions_db")]
    pub sessions_path: String,
    #[serde(default = "default_feedback_db")]
    pub feedback_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            memory_path: default_memory_db(),
            sessions_path: default_sessions_db(),
            feedback_path: default_feedback_db(),
        }
    }
}

fn default_memory_db() -> String {
    "memory.db".to_string()
}
fn default_sessions_db() -> String {
    "sessions.db".to_string()
}
fn default_feedback_db() -> String {
    "feedback.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub signal: Option<SignalConfig>,
    pub telegram: Option<TelegramConfig>,
}

/// signal-cli JSON-RPC endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_signal_rpc_url")]
    pub rpc_url: String,
    /// The E.164 number this agent answers as.
    pub account: String,
}

fn default_signal_rpc_url() -> String {
    "http://127.0.0.1:8080/api/v1/rpc".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default)]
    pub require_mention: bool,
    #[serde(default = "bool_true")]
    pub dm_allowed: bool,
    /// Telegram user IDs (as strings) allowed to talk to this bot. Empty means unrestricted.
    #[serde(default)]
    pub allow_users: Vec<String>,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

fn bool_true() -> bool {
    true
}

fn default_max_attachment_bytes() -> u64 {
    20 * 1024 * 1024
}

/// §4.A token bucket settings — global bucket plus per-chat bucket template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_global_capacity")]
    pub global_capacity: f64,
    #[serde(default = "default_global_refill")]
    pub global_refill_per_second: f64,
    #[serde(default = "default_chat_capacity")]
    pub per_chat_capacity: f64,
    #[serde(default = "default_chat_refill")]
    pub per_chat_refill_per_second: f64,
    #[serde(default = "default_bucket_ttl_secs")]
    pub bucket_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_capacity: default_global_capacity(),
            global_refill_per_second: default_global_refill(),
            per_chat_capacity: default_chat_capacity(),
            per_chat_refill_per_second: default_chat_refill(),
            bucket_ttl_secs: default_bucket_ttl_secs(),
        }
    }
}

fn default_global_capacity() -> f64 {
    20.0
}
fn default_global_refill() -> f64 {
    2.0
}
fn default_chat_capacity() -> f64 {
    5.0
}
fn default_chat_refill() -> f64 {
    0.5
}
fn default_bucket_ttl_secs() -> u64 {
    3600
}

/// §4.C message accumulator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_debounce_multiplier")]
    pub max_multiplier: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_multiplier: default_debounce_multiplier(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    300
}
fn default_debounce_multiplier() -> u64 {
    3
}

/// §4.D behavior engine thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default)]
    pub sleep: SleepConfig,
    #[serde(default = "default_velocity_window_secs")]
    pub velocity_window_secs: u64,
    #[serde(default = "default_velocity_authors")]
    pub velocity_min_authors: usize,
    #[serde(default = "default_heat_half_life_secs")]
    pub heat_half_life_secs: i64,
    #[serde(default = "default_random_skip_rate")]
    pub random_skip_rate: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            sleep: SleepConfig::default(),
            velocity_window_secs: default_velocity_window_secs(),
            velocity_min_authors: default_velocity_authors(),
            heat_half_life_secs: default_heat_half_life_secs(),
            random_skip_rate: default_random_skip_rate(),
        }
    }
}

fn default_velocity_window_secs() -> u64 {
    10
}
fn default_velocity_authors() -> usize {
    3
}
fn default_heat_half_life_secs() -> i64 {
    300
}
fn default_random_skip_rate() -> f64 {
    0.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sleep_start")]
    pub start_local: String,
    #[serde(default = "default_sleep_end")]
    pub end_local: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_local: default_sleep_start(),
            end_local: default_sleep_end(),
            timezone: default_timezone(),
        }
    }
}

fn default_sleep_start() -> String {
    "23:00".to_string()
}
fn default_sleep_end() -> String {
    "07:00".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}

/// §4.F quality gate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
    #[serde(default = "default_max_regens")]
    pub max_regens: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_sentences: default_max_sentences(),
            max_regens: default_max_regens(),
        }
    }
}

fn default_max_chars() -> usize {
    600
}
fn default_max_sentences() -> usize {
    6
}
fn default_max_regens() -> u32 {
    2
}

/// §4.G/§4.H context-builder and generation-loop knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Hard cap on estimated prompt tokens before the context builder asks
    /// the session store to compact and retries once (§4.G).
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
    /// Token budget shared across all `dataMessages` sections combined.
    #[serde(default = "default_data_messages_max_tokens")]
    pub data_messages_max_tokens: u32,
    /// Messages pulled from session history as `historyForModel` (§4.G).
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    /// `maxSteps` passed to `backend.complete` (§4.H.1).
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// `max_tokens` on the completion request.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Retries for transient backend failures (§4.H.6), excluding the
    /// dedicated one-shot model_unavailable fallback.
    #[serde(default = "default_backend_retry_limit")]
    pub backend_retry_limit: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            data_messages_max_tokens: default_data_messages_max_tokens(),
            history_messages: default_history_messages(),
            max_steps: default_max_steps(),
            max_output_tokens: default_max_output_tokens(),
            backend_retry_limit: default_backend_retry_limit(),
        }
    }
}

fn default_max_context_tokens() -> u32 {
    150_000
}
fn default_data_messages_max_tokens() -> u32 {
    4_000
}
fn default_history_messages() -> usize {
    30
}
fn default_max_steps() -> u32 {
    8
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_backend_retry_limit() -> u32 {
    3
}

/// Hybrid search tuning (§4.I).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_fts_weight")]
    pub fts_weight: f64,
    #[serde(default = "default_vec_weight")]
    pub vec_weight: f64,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "default_recency_half_life_days")]
    pub recency_half_life_days: f64,
    #[serde(default = "default_lease_ms")]
    pub dirty_queue_lease_ms: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            fts_weight: default_fts_weight(),
            vec_weight: default_vec_weight(),
            recency_weight: default_recency_weight(),
            recency_half_life_days: default_recency_half_life_days(),
            dirty_queue_lease_ms: default_lease_ms(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_fts_weight() -> f64 {
    0.6
}
fn default_vec_weight() -> f64 {
    0.4
}
fn default_recency_weight() -> f64 {
    0.2
}
fn default_recency_half_life_days() -> f64 {
    30.0
}
fn default_lease_ms() -> i64 {
    10 * 60 * 1000
}

/// Post-draft human-like delay sampling (`sampleHumanDelayMs`, §4.J.12):
/// released between the draft and the commit so a reply doesn't land the
/// instant it's generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_delay_min_ms")]
    pub min_ms: u64,
    #[serde(default = "default_delay_max_ms")]
    pub max_ms: u64,
    /// Per-character pacing added to the `send_text` baseline, approximating
    /// typing speed.
    #[serde(default = "default_delay_ms_per_char")]
    pub ms_per_char: u64,
    /// Standard deviation of the Gaussian jitter added to `send_text` delays.
    #[serde(default = "default_delay_jitter_std_ms")]
    pub jitter_std_ms: f64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_ms: default_delay_min_ms(),
            max_ms: default_delay_max_ms(),
            ms_per_char: default_delay_ms_per_char(),
            jitter_std_ms: default_delay_jitter_std_ms(),
        }
    }
}

fn default_delay_min_ms() -> u64 {
    700
}
fn default_delay_max_ms() -> u64 {
    6_000
}
fn default_delay_ms_per_char() -> u64 {
    35
}
fn default_delay_jitter_std_ms() -> f64 {
    500.0
}
