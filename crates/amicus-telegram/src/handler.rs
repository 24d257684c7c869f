//! Telegram message handler registered in the teloxide Dispatcher.

use std::sync::Arc;

use amicus_core::config::{AmicusConfig, TelegramConfig};
use amicus_core::{Channel as CoreChannel, ChatId, IncomingMessage, Mentioned, MessageId, OutgoingAction};
use amicus_memory::manager::MemoryManager;
use amicus_turn::engine::{Generator, TurnEngine};
use teloxide::prelude::*;
use tracing::warn;

use crate::allow;
use crate::attach;
use crate::send;
use crate::typing::TypingHandle;

/// Main message handler registered in the teloxide Dispatcher.
///
/// Every gating decision beyond allowlist/DM-guard (sleep windows, thread
/// locks, domination, velocity, engagement rolls) lives in
/// `amicus_turn::behavior::BehaviorEngine` — this handler's only job is to
/// build a faithful `IncomingMessage` and hand it to the turn engine.
pub async fn handle_message<G: Generator + 'static>(
    bot: Bot,
    msg: Message,
    engine: Arc<TurnEngine>,
    cfg: Arc<AmicusConfig>,
    memory: Arc<MemoryManager>,
    generator: Arc<G>,
    config: TelegramConfig,
) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }

    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let username = from.username.as_deref().unwrap_or("");
    let telegram_user_id = from.id.0.to_string();

    if !allow::is_allowed(&config.allow_users, username, &telegram_user_id) {
        return Ok(());
    }

    if msg.chat.is_private() && !config.dm_allowed {
        return Ok(());
    }

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    let attachments = attach::enforce_size_limit(attach::extract_attachments(&msg), config.max_attachment_bytes);

    if text.trim().is_empty() && attachments.is_empty() {
        return Ok(());
    }

    let is_group = msg.chat.is_group() || msg.chat.is_supergroup();
    let mentioned = if is_group {
        if config.require_mention {
            resolve_mention(&bot, &msg, &text).await
        } else {
            Mentioned::Unknown
        }
    } else {
        Mentioned::Yes
    };

    let chat_id = ChatId::from(telegram_chat_id(&msg));
    let incoming = IncomingMessage {
        channel: CoreChannel::Telegram,
        chat_id: chat_id.clone(),
        message_id: MessageId::from(msg.id.0.to_string()),
        author_id: telegram_user_id,
        author_display_name: from.username.clone().or_else(|| Some(from.first_name.clone())),
        text,
        attachments,
        is_group,
        is_operator: false,
        mentioned,
        timestamp_ms: msg.date.timestamp_millis(),
    };

    let bot2 = bot.clone();
    let tg_chat_id = msg.chat.id;
    tokio::spawn(async move {
        let typing = TypingHandle::start(bot2.clone(), tg_chat_id);

        let outcome = engine.process(incoming, &cfg, &memory, generator.as_ref()).await;

        typing.stop();

        match outcome {
            None => {}
            Some(Ok(OutgoingAction::SendText { text, .. })) => {
                send::send_response(&bot2, tg_chat_id, &text).await;
            }
            Some(Ok(OutgoingAction::React { emoji, .. })) => {
                if let Err(e) = send_reaction(&bot2, tg_chat_id, msg.id, &emoji).await {
                    warn!(error = %e, "telegram: failed to set reaction");
                }
            }
            Some(Ok(OutgoingAction::Silence { reason })) => {
                tracing::debug!(%reason, chat_id = %chat_id, "telegram: turn silenced");
            }
            Some(Err(e)) => {
                warn!(error = %e, chat_id = %chat_id, "telegram: turn engine failed");
            }
        }
    });

    Ok(())
}

/// Telegram message reactions (`setMessageReaction`) aren't exposed by the
/// teloxide payload types this crate pulls in; fall back to sending the
/// emoji as a standalone reply so the behavior is still visible to the user.
async fn send_reaction(
    bot: &Bot,
    chat_id: teloxide::types::ChatId,
    _message_id: teloxide::types::MessageId,
    emoji: &str,
) -> Result<(), teloxide::RequestError> {
    bot.send_message(chat_id, emoji).await.map(|_| ())
}

/// `telegram:dm:{user_id}` for private chats, `telegram:group:{chat_id}`
/// (or `:{thread_id}` suffixed for forum topics) for everything else.
fn telegram_chat_id(msg: &Message) -> String {
    if msg.chat.is_private() {
        let uid = msg.from.as_ref().map(|u| u.id.0).unwrap_or(0);
        return format!("telegram:dm:{uid}");
    }
    let chat_id = msg.chat.id.0;
    match msg.thread_id {
        Some(thread_id) => format!("telegram:group:{chat_id}:{}", thread_id.0),
        None => format!("telegram:group:{chat_id}"),
    }
}

/// Resolves `Mentioned` for a group message under `require_mention`: `Yes`
/// when the bot's `@username` appears in the text, `No` otherwise — the
/// behavior engine (not this adapter) decides whether `No` means silence.
async fn resolve_mention(bot: &Bot, msg: &Message, text: &str) -> Mentioned {
    let bot_username = match bot.get_me().await {
        Ok(me) => me.user.username.clone().unwrap_or_default(),
        Err(_) => return Mentioned::Unknown,
    };
    if contains_mention(text, &bot_username) || is_reply_to_bot(msg) {
        Mentioned::Yes
    } else {
        Mentioned::No
    }
}

fn is_reply_to_bot(msg: &Message) -> bool {
    msg.reply_to_message()
        .and_then(|r| r.from.as_ref())
        .map(|u| u.is_bot)
        .unwrap_or(false)
}

/// Return `true` if `text` contains a `@bot_username` mention.
fn contains_mention(text: &str, bot_username: &str) -> bool {
    if bot_username.is_empty() {
        return false;
    }
    let mention = format!("@{bot_username}");
    text.contains(&mention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_mention_positive() {
        assert!(contains_mention("Hey @mybot, help!", "mybot"));
    }

    #[test]
    fn contains_mention_negative() {
        assert!(!contains_mention("Hello there", "mybot"));
    }

    #[test]
    fn contains_mention_empty_username() {
        assert!(!contains_mention("@foo bar", ""));
    }
}
