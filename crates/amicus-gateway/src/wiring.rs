//! Shared construction of the stores, backend, and generator every
//! subcommand needs. Centralised here so `start`, `chat`, `consolidate`,
//! and `eval` build the exact same stack, and so `status`/`doctor`/`trust`/
//! `export`/`forget`/`self-improve` can open just the stores without
//! requiring a configured LLM provider.

use std::path::PathBuf;
use std::sync::Arc;

use amicus_agent::context::ContextBuilder;
use amicus_agent::prompt::PromptBuilder;
use amicus_agent::{AnthropicBackend, LLMBackend, TurnGenerator};
use amicus_core::config::AmicusConfig;
use amicus_core::{AmicusError, Result};
use amicus_memory::feedback::FeedbackStore;
use amicus_memory::manager::MemoryManager;
use amicus_scheduler::SchedulerHandle;
use amicus_sessions::manager::SessionManager;

pub fn load_config(config_path: Option<&str>) -> Result<AmicusConfig> {
    AmicusConfig::load(config_path)
}

/// The three SQLite-backed stores, opened with no dependency on a
/// configured LLM provider. What commands that only read/write data
/// (`status`, `doctor`, `trust`, `export`, `forget`, `self-improve`) need.
pub struct Stores {
    pub cfg: Arc<AmicusConfig>,
    pub data_dir: String,
    pub memory: Arc<MemoryManager>,
    pub sessions: Arc<SessionManager>,
    pub scheduler: Arc<SchedulerHandle>,
    pub feedback: Arc<FeedbackStore>,
}

/// Everything a running Amicus process needs, minus the channel adapters
/// themselves (those are registered by `start` once this is built).
pub struct Runtime {
    pub stores: Stores,
    pub generator: Arc<TurnGenerator>,
}

pub fn memory_path(cfg: &AmicusConfig) -> String {
    resolve_path(&cfg.data_dir(), &cfg.database.memory_path)
}

pub fn sessions_path(cfg: &AmicusConfig) -> String {
    resolve_path(&cfg.data_dir(), &cfg.database.sessions_path)
}

pub fn jobs_path(cfg: &AmicusConfig) -> String {
    resolve_path(&cfg.data_dir(), "jobs.db")
}

/// Resolves `database.feedback_path` under the data dir the same way the
/// other two stores are resolved.
pub fn feedback_path(cfg: &AmicusConfig) -> String {
    resolve_path(&cfg.data_dir(), &cfg.database.feedback_path)
}

pub fn open_stores(cfg: AmicusConfig) -> Result<Stores> {
    let cfg = Arc::new(cfg);
    let data_dir = cfg.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let memory_conn = amicus_memory::db::open(&memory_path(&cfg))?;
    let embedder = build_embedder(&cfg);
    let memory = Arc::new(MemoryManager::new(memory_conn, embedder, PathBuf::from(&data_dir)));

    let sessions_conn = amicus_sessions::db::open(&sessions_path(&cfg))?;
    let sessions = Arc::new(SessionManager::new(sessions_conn));

    let jobs_conn = rusqlite::Connection::open(jobs_path(&cfg))
        .map_err(|e| AmicusError::Database(e.to_string()))?;
    let scheduler = Arc::new(SchedulerHandle::new(jobs_conn)?);

    let feedback = Arc::new(FeedbackStore::open(&feedback_path(&cfg))?);

    Ok(Stores { cfg, data_dir, memory, sessions, scheduler, feedback })
}

/// Builds on [`open_stores`] with the LLM backend, prompt, and context
/// assembly that only the generating commands (`start`, `chat`,
/// `consolidate`, `eval`) need. Fails if no provider is configured.
pub fn build_runtime(cfg: AmicusConfig) -> Result<Runtime> {
    let stores = open_stores(cfg)?;

    let backend = build_backend(&stores.cfg)?;
    let prompt = PromptBuilder::load(stores.cfg.agent.soul_path.as_deref(), Some(&stores.data_dir));
    let context = ContextBuilder::new(Arc::clone(&stores.memory), Arc::clone(&stores.sessions), prompt);

    let generator = Arc::new(
        TurnGenerator::new(
            Arc::clone(&stores.cfg),
            backend,
            Arc::clone(&stores.memory),
            Arc::clone(&stores.sessions),
            Arc::clone(&stores.scheduler),
            context,
        )
        .with_feedback(Arc::clone(&stores.feedback)),
    );

    Ok(Runtime { stores, generator })
}

pub fn build_backend(cfg: &AmicusConfig) -> Result<Arc<dyn LLMBackend>> {
    let anthropic = cfg
        .providers
        .anthropic
        .as_ref()
        .ok_or_else(|| AmicusError::Config("providers.anthropic is required".into()))?;

    Ok(Arc::new(AnthropicBackend::new(
        anthropic.api_key.clone(),
        Some(anthropic.base_url.clone()),
        cfg.agent.model.clone(),
        cfg.agent.fast_model.clone(),
    )))
}

/// No local embedding model ships in this repo — search falls back to FTS5
/// alone until an `Embedder` impl is wired in (§4.G note, open question).
fn build_embedder(_cfg: &AmicusConfig) -> Option<Box<dyn amicus_memory::search::Embedder>> {
    None
}

fn resolve_path(data_dir: &str, configured: &str) -> String {
    if configured.starts_with('/') {
        configured.to_string()
    } else {
        format!("{data_dir}/{configured}")
    }
}
