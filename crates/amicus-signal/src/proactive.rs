//! Proactive Signal delivery — drains scheduler-fired jobs and routes each
//! through the turn engine's proactive path, mirroring
//! `amicus-telegram/src/proactive.rs`.

use std::sync::Arc;

use amicus_core::config::AmicusConfig;
use amicus_memory::manager::MemoryManager;
use amicus_scheduler::Job;
use amicus_turn::engine::TurnEngine;
use amicus_turn::proactive::{ProactiveGenerator, ProactiveTrigger};
use tracing::warn;

use crate::rpc::RpcClient;
use crate::send;

pub async fn run_proactive_delivery<G: ProactiveGenerator + 'static>(
    rpc: Arc<RpcClient>,
    account: String,
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
                warn!(job_id = %job.id, error = %e, "signal: malformed proactive job action");
                continue;
            }
        };

        let chat_id = trigger.chat_id.clone();
        let result = engine
            .process_proactive(chat_id.clone(), &cfg, &memory, generator.as_ref(), trigger, false)
            .await;

        match result {
            Ok(amicus_core::OutgoingAction::SendText { text, .. }) => {
                if let Err(e) = send::send_response(&rpc, &account, &chat_id, &text).await {
                    warn!(job_id = %job.id, error = %e, "signal: proactive send failed");
                } else {
                    tracing::info!(job_id = %job.id, "signal: proactive message delivered");
                }
            }
            Ok(amicus_core::OutgoingAction::React { .. }) | Ok(amicus_core::OutgoingAction::Silence { .. }) => {}
            Err(e) => warn!(job_id = %job.id, error = %e, "signal: proactive generation failed"),
        }
    }

    tracing::info!("signal proactive delivery task exiting (channel closed)");
}
