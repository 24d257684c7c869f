//! Signal channel adapter.
//!
//! `signal-cli` in JSON-RPC mode has no long-polling HTTP verb the way
//! Telegram's `getUpdates` does, so inbound delivery is a simple poll loop:
//! call `receive` on a short interval, translate whatever envelopes come
//! back, hand each to the turn engine.

use std::sync::Arc;
use std::time::Duration;

use amicus_core::config::{AmicusConfig, SignalConfig};
use amicus_memory::manager::MemoryManager;
use amicus_scheduler::Job;
use amicus_turn::engine::{Generator, TurnEngine};
use amicus_turn::proactive::ProactiveGenerator;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use amicus_channels::{Channel, ChannelError, ChannelStatus, OutboundMessage};

use crate::handler::handle_envelope;
use crate::rpc::RpcClient;
use crate::types::ReceiveEnvelope;

/// Poll interval between `receive` calls when the daemon returns nothing.
const POLL_INTERVAL: Duration = Duration::from_millis(1500);
/// Max attachment size accepted from Signal, matching Telegram's default.
const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

pub struct SignalAdapter<G: Generator + ProactiveGenerator + 'static> {
    config: SignalConfig,
    rpc: Arc<RpcClient>,
    engine: Arc<TurnEngine>,
    cfg: Arc<AmicusConfig>,
    memory: Arc<MemoryManager>,
    generator: Arc<G>,
}

impl<G: Generator + ProactiveGenerator + 'static> SignalAdapter<G> {
    pub fn new(
        config: SignalConfig,
        engine: Arc<TurnEngine>,
        cfg: Arc<AmicusConfig>,
        memory: Arc<MemoryManager>,
        generator: Arc<G>,
    ) -> Self {
        let rpc = Arc::new(RpcClient::new(config.rpc_url.clone()));
        Self { config, rpc, engine, cfg, memory, generator }
    }

    /// Poll `receive` until `shutdown` fires. If `proactive_rx` is `Some`,
    /// a delivery task for scheduler-fired jobs runs alongside the poll loop.
    pub async fn run(self, proactive_rx: Option<mpsc::Receiver<Job>>, shutdown: CancellationToken) {
        if let Some(rx) = proactive_rx {
            tokio::spawn(crate::proactive::run_proactive_delivery(
                Arc::clone(&self.rpc),
                self.config.account.clone(),
                rx,
                Arc::clone(&self.engine),
                Arc::clone(&self.cfg),
                Arc::clone(&self.memory),
                Arc::clone(&self.generator),
            ));
        }

        info!("Signal: starting receive poll loop for {}", self.config.account);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Signal: shutdown requested, stopping poll loop");
                    break;
                }
                result = self.poll_once() => {
                    if let Err(e) = result {
                        warn!(error = %e, "signal: receive poll failed");
                    }
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = shutdown.cancelled() => break,
            }
        }
    }

    async fn poll_once(&self) -> Result<(), crate::error::SignalError> {
        let params = serde_json::json!({
            "account": self.config.account,
            "timeout": 1,
        });
        let envelopes: Vec<ReceiveEnvelope> = self.rpc.call("receive", params).await?;

        for entry in envelopes {
            handle_envelope(
                entry,
                Arc::clone(&self.rpc),
                self.config.account.clone(),
                Arc::clone(&self.engine),
                Arc::clone(&self.cfg),
                Arc::clone(&self.memory),
                Arc::clone(&self.generator),
                DEFAULT_MAX_ATTACHMENT_BYTES,
            )
            .await;
        }
        Ok(())
    }
}

/// Adapts [`SignalAdapter`] to the cross-channel [`amicus_channels::Channel`]
/// interface, the same way `TelegramChannel` does for Telegram.
///
/// Like Telegram, Signal replies flow out through the turn engine's own
/// pipeline rather than via externally-pushed [`OutboundMessage`] values, so
/// `send()` is a logged no-op.
pub struct SignalChannel<G: Generator + ProactiveGenerator + 'static> {
    config: SignalConfig,
    engine: Arc<TurnEngine>,
    cfg: Arc<AmicusConfig>,
    memory: Arc<MemoryManager>,
    generator: Arc<G>,
    proactive_rx: std::sync::Mutex<Option<mpsc::Receiver<Job>>>,
    shutdown: CancellationToken,
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    status: std::sync::Mutex<ChannelStatus>,
}

impl<G: Generator + ProactiveGenerator + 'static> SignalChannel<G> {
    pub fn new(
        config: SignalConfig,
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
impl<G: Generator + ProactiveGenerator + 'static> Channel for SignalChannel<G> {
    fn name(&self) -> &str {
        "signal"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        *self.status.lock().unwrap() = ChannelStatus::Connecting;

        let adapter = SignalAdapter::new(
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
            "signal channel: send() called directly, but Signal delivery always runs \
             through the turn engine pipeline — ignoring"
        );
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}
