//! Turns a single `signal-cli` envelope into an `IncomingMessage` and hands
//! it to the turn engine, mirroring `amicus-telegram/src/handler.rs`.

use std::sync::Arc;

use amicus_core::config::AmicusConfig;
use amicus_core::{Channel as CoreChannel, ChatId, IncomingMessage, Mentioned, MessageId, OutgoingAction};
use amicus_memory::manager::MemoryManager;
use amicus_turn::engine::{Generator, TurnEngine};
use tracing::warn;

use crate::attach;
use crate::rpc::RpcClient;
use crate::send;
use crate::types::ReceiveEnvelope;
use crate::typing::TypingHandle;

/// Handles one `receive` envelope: filters out non-message events, builds
/// the canonical `IncomingMessage`, and spawns the turn engine pipeline.
///
/// Every gating decision beyond "is this a text/attachment message at all"
/// (sleep windows, thread locks, domination, velocity, engagement rolls)
/// lives in `amicus_turn::behavior::BehaviorEngine`.
pub async fn handle_envelope<G: Generator + 'static>(
    entry: ReceiveEnvelope,
    rpc: Arc<RpcClient>,
    account: String,
    engine: Arc<TurnEngine>,
    cfg: Arc<AmicusConfig>,
    memory: Arc<MemoryManager>,
    generator: Arc<G>,
    max_attachment_bytes: u64,
) {
    let envelope = entry.envelope;
    let Some(data) = envelope.data_message else {
        return;
    };

    let text = data.message.unwrap_or_default();
    let attachments =
        attach::enforce_size_limit(attach::extract_attachments(&data.attachments), max_attachment_bytes);

    if text.trim().is_empty() && attachments.is_empty() {
        return;
    }

    let is_group = data.group_info.is_some();
    let chat_id = match &data.group_info {
        Some(group) => ChatId::from(format!("signal:group:{}", group.group_id)),
        None => ChatId::from(format!("signal:dm:{}", envelope.source)),
    };

    // `signal-cli` reports mentions by UUID, and the configured account is
    // an E.164 number — there's no cheap way to resolve "was our own UUID
    // mentioned" without an extra round trip, so group messages are left
    // `Unknown` here and the not-explicitly-mentioned gate (§4.D.2) simply
    // never fires for Signal groups unless a future adapter revision
    // resolves the bot's own UUID once at startup.
    let mentioned = if is_group { Mentioned::Unknown } else { Mentioned::Yes };

    let incoming = IncomingMessage {
        channel: CoreChannel::Signal,
        chat_id: chat_id.clone(),
        message_id: MessageId::from(format!("{}:{}", envelope.source, envelope.timestamp)),
        author_id: envelope.source.clone(),
        author_display_name: envelope.source_name.clone(),
        text,
        attachments,
        is_group,
        is_operator: false,
        mentioned,
        timestamp_ms: envelope.timestamp,
    };

    let source = envelope.source;
    let source_ts = envelope.timestamp;
    tokio::spawn(async move {
        let typing = TypingHandle::start(Arc::clone(&rpc), account.clone(), chat_id.clone());

        let outcome = engine.process(incoming, &cfg, &memory, generator.as_ref()).await;

        typing.stop();

        match outcome {
            None => {}
            Some(Ok(OutgoingAction::SendText { text, .. })) => {
                if let Err(e) = send::send_response(&rpc, &account, &chat_id, &text).await {
                    warn!(error = %e, %chat_id, "signal: failed to send response");
                }
            }
            Some(Ok(OutgoingAction::React { emoji, .. })) => {
                if let Err(e) =
                    send::send_reaction(&rpc, &account, &chat_id, &source, source_ts, &emoji).await
                {
                    warn!(error = %e, %chat_id, "signal: failed to send reaction");
                }
            }
            Some(Ok(OutgoingAction::Silence { reason })) => {
                tracing::debug!(%reason, %chat_id, "signal: turn silenced");
            }
            Some(Err(e)) => {
                warn!(error = %e, %chat_id, "signal: turn engine failed");
            }
        }
    });
}
