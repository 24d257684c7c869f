//! Proactive Telegram delivery — drains scheduler-fired jobs and routes
//! each through the turn engine's proactive path, sending whatever comes back.

use std::sync::Arc;

use amicus_core::config::AmicusConfig;
use amicus_core::ChatId as CoreChatId;
use amicus_memory::manager::MemoryManager;
use amicus_scheduler::Job;
use amicus_turn::engine::TurnEngine;
use amicus_turn::proactive::{ProactiveGenerator, ProactiveTrigger};
use teloxide::prelude::*;
use tracing::warn;

use crate::send;

/// Background task that receives fired jobs and delivers the resulting
/// message to Telegram.
///
/// Spawned once in `adapter.rs` when the adapter starts; runs for the
/// lifetime of the Telegram connection.
pub async fn run_proactive_delivery<G: ProactiveGenerator + 'static>(
    bot: Bot,
    mut rx: tokio::sync::mpsc::Receiver<Job>,
    engine: Arc<TurnEngine>,
    cfg: Arc<AmicusConfig>,
    memory: Arc<MemoryManager>,
    generator: Arc<G>,
) {
    while let Some(job) = rx.recv().await {
        let trigger = match ProactiveTrigger::from_job(&job) {
            Ok(t) => t,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "telegram: malformed proactive job action");
                continue;
            }
        };

        let Some(chat_id) = parse_chat_id(trigger.chat_id.as_str()) else {
            warn!(job_id = %job.id, chat_id = %trigger.chat_id, "telegram: unparseable proactive chat id");
            continue;
        };

        let core_chat_id: CoreChatId = trigger.chat_id.clone();
        let result = engine
            .process_proactive(core_chat_id, &cfg, &memory, generator.as_ref(), trigger, false)
            .await;

        match result {
            Ok(amicus_core::OutgoingAction::SendText { text, .. }) => {
                send::send_response(&bot, chat_id, &text).await;
                tracing::info!(job_id = %job.id, "telegram: proactive message delivered");
            }
            Ok(amicus_core::OutgoingAction::React { .. }) | Ok(amicus_core::OutgoingAction::Silence { .. }) => {}
            Err(e) => warn!(job_id = %job.id, error = %e, "telegram: proactive generation failed"),
        }
    }

    tracing::info!("telegram proactive delivery task exiting (channel closed)");
}

/// Recovers a Telegram numeric chat id from the `telegram:dm:{id}` /
/// `telegram:group:{id}[:{thread}]` scheme used to build `ChatId` strings.
pub fn parse_chat_id(s: &str) -> Option<ChatId> {
    let rest = s.strip_prefix("telegram:dm:").or_else(|| s.strip_prefix("telegram:group:"))?;
    let id_part = rest.split(':').next()?;
    id_part.parse::<i64>().ok().map(ChatId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dm_chat_id() {
        assert_eq!(parse_chat_id("telegram:dm:12345"), Some(ChatId(12345)));
    }

    #[test]
    fn parses_group_chat_id() {
        assert_eq!(parse_chat_id("telegram:group:-100123"), Some(ChatId(-100123)));
    }

    #[test]
    fn parses_forum_topic_chat_id() {
        assert_eq!(parse_chat_id("telegram:group:-100123:7"), Some(ChatId(-100123)));
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert_eq!(parse_chat_id("signal:dm:+1"), None);
    }
}
