//! `start` (§6.1): boots the turn engine, connects configured channel
//! adapters, runs the scheduler, and blocks until `Ctrl-C` / `SIGTERM`
//! cancels the root token (§5 — generalised from the teacher's
//! `watch::Receiver<bool>` shutdown into a single `CancellationToken`).

use std::sync::Arc;

use amicus_channels::ChannelManager;
use amicus_core::Result;
use amicus_scheduler::{Job, SchedulerEngine};
use amicus_signal::SignalChannel;
use amicus_telegram::TelegramChannel;
use amicus_turn::engine::TurnEngine;
use amicus_turn::proactive::ProactiveTrigger;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::wiring;

pub async fn run(config_path: Option<&str>) -> Result<()> {
    let cfg = wiring::load_config(config_path)?;
    let runtime = wiring::build_runtime(cfg)?;
    let stores = runtime.stores;
    let generator = runtime.generator;

    let engine = Arc::new(TurnEngine::new(&stores.cfg));
    let root_token = CancellationToken::new();

    let mut channels = ChannelManager::new();
    let mut signal_tx = None;
    let mut telegram_tx = None;

    if let Some(signal_cfg) = stores.cfg.channels.signal.clone() {
        let (tx, rx) = mpsc::channel::<Job>(64);
        signal_tx = Some(tx);
        channels.register(Box::new(SignalChannel::new(
            signal_cfg,
            Arc::clone(&engine),
            Arc::clone(&stores.cfg),
            Arc::clone(&stores.memory),
            Arc::clone(&generator),
            Some(rx),
        )));
    }

    if let Some(telegram_cfg) = stores.cfg.channels.telegram.clone() {
        let (tx, rx) = mpsc::channel::<Job>(64);
        telegram_tx = Some(tx);
        channels.register(Box::new(TelegramChannel::new(
            telegram_cfg,
            Arc::clone(&engine),
            Arc::clone(&stores.cfg),
            Arc::clone(&stores.memory),
            Arc::clone(&generator),
            Some(rx),
        )));
    }

    channels.connect_all().await;

    let (fired_tx, mut fired_rx) = mpsc::channel::<Job>(256);
    let scheduler_conn = rusqlite::Connection::open(wiring::jobs_path(&stores.cfg))
        .map_err(|e| amicus_core::AmicusError::Database(e.to_string()))?;
    let scheduler_engine = SchedulerEngine::new(scheduler_conn, Some(fired_tx))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(async move {
        scheduler_engine.run(shutdown_rx).await;
    });

    // Demultiplexes the scheduler's single fired-job stream across each
    // connected channel's own proactive_rx, keyed by the chat_id prefix
    // every adapter writes into `ProactiveTrigger::chat_id` (§4.K).
    let routing_token = root_token.clone();
    let routing_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = routing_token.cancelled() => break,
                job = fired_rx.recv() => {
                    let Some(job) = job else { break };
                    route_job(job, signal_tx.as_ref(), telegram_tx.as_ref()).await;
                }
            }
        }
    });

    info!("amicus: running, press Ctrl-C to stop");
    wait_for_shutdown_signal().await;

    root_token.cancel();
    let _ = shutdown_tx.send(true);
    channels.disconnect_all().await;
    let _ = routing_task.await;
    let _ = scheduler_handle.await;

    Ok(())
}

async fn route_job(job: Job, signal_tx: Option<&mpsc::Sender<Job>>, telegram_tx: Option<&mpsc::Sender<Job>>) {
    let trigger = match ProactiveTrigger::from_job(&job) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, job_id = %job.id, "dropping proactive job with unparseable action");
            return;
        }
    };
    let chat_id = trigger.chat_id.as_str();

    let target = if chat_id.starts_with("signal:") {
        signal_tx
    } else if chat_id.starts_with("telegram:") {
        telegram_tx
    } else {
        None
    };

    match target {
        Some(tx) => {
            if tx.send(job).await.is_err() {
                warn!(%chat_id, "proactive job dropped: channel receiver closed");
            }
        }
        None => warn!(%chat_id, "proactive job targets no connected channel"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
