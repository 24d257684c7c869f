//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling event
//! loop until cancelled. Long polling — no public URL required.

use std::sync::Arc;

use amicus_core::config::{AmicusConfig, TelegramConfig};
use amicus_memory::manager::MemoryManager;
use amicus_scheduler::Job;
use amicus_turn::engine::{Generator, TurnEngine};
use amicus_turn::proactive::ProactiveGenerator;
use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use amicus_channels::{Channel, ChannelError, ChannelStatus, OutboundMessage};

use crate::handler::handle_message;

/// Drives the Telegram long-polling dispatcher for the lifetime it's awaited.
pub struct TelegramAdapter<G: Generator + ProactiveGenerator + 'static> {
    config: TelegramConfig,
    engine: Arc<TurnEngine>,
    cfg: Arc<AmicusConfig>,
    memory: Arc<MemoryManager>,
    generator: Arc<G>,
}

impl<G: Generator + ProactiveGenerator + 'static> TelegramAdapter<G> {
    pub fn new(
        config: TelegramConfig,
        engine: Arc<TurnEngine>,
        cfg: Arc<AmicusConfig>,
        memory: Arc<MemoryManager>,
        generator: Arc<G>,
    ) -> Self {
        Self { config, engine, cfg, memory, generator }
    }

    /// Connect to Telegram and drive the long-polling loop until `shutdown`
    /// is cancelled. If `proactive_rx` is `Some`, a delivery task for
    /// scheduler-fired jobs is spawned alongside the dispatcher.
    pub async fn run(self, proactive_rx: Option<mpsc::Receiver<Job>>, shutdown: CancellationToken) {
        let bot = Bot::new(&self.config.bot_token);

        if let Some(rx) = proactive_rx {
            tokio::spawn(crate::proactive::run_proactive_delivery(
                bot.clone(),
                rx,
                Arc::clone(&self.engine),
                Arc::clone(&self.cfg),
                Arc::clone(&self.memory),
                Arc::clone(&self.generator),
            ));
        }

        info!("Telegram: starting long-polling dispatcher");

        let engine = Arc::clone(&self.engine);
        let cfg = Arc::clone(&self.cfg);
        let memory = Arc::clone(&self.memory);
        let generator = Arc::clone(&self.generator);
        let config = self.config.clone();

        let handler = Update::filter_message().endpoint(handle_message::<G>);

        let mut dispatcher = Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![engine, cfg, memory, generator, config])
            .default_handler(|_upd| async {})
            .build();

        tokio::select! {
            _ = dispatcher.dispatch() => {}
            _ = shutdown.cancelled() => {
                info!("Telegram: shutdown requested, stopping dispatcher");
            }
        }
    }
}

/// Adapts [`TelegramAdapter`] to the cross-channel [`amicus_channels::Channel`]
/// interface so it can be registered in a [`amicus_channels::ChannelManager`]
/// alongside other adapters.
///
/// Telegram replies flow out through the turn engine's own pipeline rather
/// than via externally-pushed [`OutboundMessage`] values, so `send()` here is
/// a logged no-op — outbound delivery for this channel always originates
/// from `handle_message` or `proactive::run_proactive_delivery`.
pub struct TelegramChannel<G: Generator + ProactiveGenerator + 'static> {
    config: TelegramConfig,
    engine: Arc<TurnEngine>,
    cfg: Arc<AmicusConfig>,
    memory: Arc<MemoryManager>,
    generator: Arc<G>,
    proactive_rx: std::sync::Mutex<Option<mpsc::Receiver<Job>>>,
    shutdown: CancellationToken,
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    status: std::sync::Mutex<ChannelStatus>,
}

impl<G: Generator + ProactiveGenerator + 'static> TelegramChannel<G> {
    pub fn new(
        config: TelegramConfig,
        engine: Arc<TurnEngine>,
        cfg: Arc<AmicusConfig>,
        memory: Arc<MemoryManager>,
        generator: Arc<G>,
        proactive_rx: Option<mpsc::Receiver<Job>>,
    ) -> Self {
        Self {
            config,
            engine,
            cfg,
            memory,
            generator,
            proactive_rx: std::sync::Mutex::new(proactive_rx),
            shutdown: CancellationToken::new(),
            task: std::sync::Mutex::new(None),
            status: std::sync::Mutex::new(ChannelStatus::Disconnected),
        }
    }
}

#[async_trait]
impl<G: Generator + ProactiveGenerator + 'static> Channel for TelegramChannel<G> {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        *self.status.lock().unwrap() = ChannelStatus::Connecting;

        let adapter = TelegramAdapter::new(
            self.config.clone(),
            Arc::clone(&self.engine),
            Arc::clone(&self.cfg),
            Arc::clone(&self.memory),
            Arc::clone(&self.generator),
        );
        let proactive_rx = self.proactive_rx.lock().unwrap().take();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            adapter.run(proactive_rx, shutdown).await;
        });
        *self.task.lock().unwrap() = Some(handle);
        *self.status.lock().unwrap() = ChannelStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.shutdown.cancel();
        if let Some(handle) = self.task.lock().unwrap().take() {
            let _ = handle.await;
        }
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, _msg: &OutboundMessage) -> Result<(), ChannelError> {
        tracing::warn!(
            "telegram channel: send() called directly, but Telegram delivery always runs \
             through the turn engine pipeline — ignoring"
        );
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}
