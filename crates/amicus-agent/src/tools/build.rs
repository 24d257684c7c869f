//! Tool registry — builds the canonical tool list for a generation attempt.

use std::sync::Arc;

use amicus_core::config::AmicusConfig;
use amicus_core::ChatId;
use amicus_memory::manager::MemoryManager;
use amicus_scheduler::SchedulerHandle;

use super::memory::{MemoryRememberTool, MemorySearchTool};
use super::reminder::ReminderTool;
use super::Tool;

/// Build the full list of tools available to the AI for a given turn.
///
/// Includes `memory_search`, `memory_remember` (the hybrid fact/episode
/// store, §4.I) and `reminder` (proactive scheduling, §4.K). `recipient_*`
/// are forwarded to `ReminderTool` so a fired reminder knows where to
/// deliver (§4.K.1).
pub fn build_tools(
    memory: Arc<MemoryManager>,
    config: Arc<AmicusConfig>,
    scheduler: Arc<SchedulerHandle>,
    chat_id: ChatId,
    recipient_channel: Option<String>,
    recipient_user_id: Option<String>,
) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(MemorySearchTool::new(Arc::clone(&memory), config)),
        Box::new(MemoryRememberTool::new(memory)),
        Box::new(ReminderTool::new(
            scheduler,
            chat_id,
            recipient_channel,
            recipient_user_id,
        )),
    ]
}
