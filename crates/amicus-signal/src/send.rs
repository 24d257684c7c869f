//! Outbound delivery helpers for the Signal adapter.
//!
//! `signal-cli` has no hard message-length limit the way Telegram does, but
//! very long single messages are unpleasant on mobile clients, so outbound
//! text is still chunked defensively.

use amicus_core::ChatId;

use crate::error::SignalError;
use crate::rpc::RpcClient;

/// Conservative chunk size — well under signal-cli's own practical limits.
const CHUNK_MAX: usize = 2000;

/// Word-boundary-aware chunking; falls back to a hard split if a single
/// "word" (e.g. a URL) exceeds `CHUNK_MAX` on its own.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while remaining.len() > CHUNK_MAX {
        let window = &remaining[..CHUNK_MAX];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .unwrap_or(CHUNK_MAX);
        chunks.push(remaining[..split_at].trim_end().to_string());
        remaining = remaining[split_at..].trim_start();
    }
    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

/// Recover the `signal-cli` send target (a `(recipient, group_id)` pair,
/// exactly one of which is set) from the `signal:dm:{e164}` /
/// `signal:group:{id}` scheme used to build `ChatId` strings.
fn recipient_of(chat_id: &ChatId) -> (Option<String>, Option<String>) {
    let s = chat_id.as_str();
    if let Some(number) = s.strip_prefix("signal:dm:") {
        (Some(number.to_string()), None)
    } else if let Some(group_id) = s.strip_prefix("signal:group:") {
        (None, Some(group_id.to_string()))
    } else {
        (None, None)
    }
}

pub async fn send_response(
    rpc: &RpcClient,
    account: &str,
    chat_id: &ChatId,
    text: &str,
) -> Result<(), SignalError> {
    let (recipient, group_id) = recipient_of(chat_id);
    for chunk in split_chunks(text) {
        let mut params = serde_json::json!({
            "account": account,
            "message": chunk,
        });
        if let Some(ref r) = recipient {
            params["recipient"] = serde_json::json!([r]);
        }
        if let Some(ref g) = group_id {
            params["groupId"] = serde_json::json!(g);
        }
        rpc.call::<serde_json::Value>("send", params).await?;
    }
    Ok(())
}

pub async fn send_reaction(
    rpc: &RpcClient,
    account: &str,
    chat_id: &ChatId,
    target_author: &str,
    target_timestamp_ms: i64,
    emoji: &str,
) -> Result<(), SignalError> {
    let (recipient, group_id) = recipient_of(chat_id);
    let mut params = serde_json::json!({
        "account": account,
        "emoji": emoji,
        "targetAuthor": target_author,
        "targetTimestamp": target_timestamp_ms,
    });
    if let Some(ref r) = recipient {
        params["recipient"] = serde_json::json!([r]);
    }
    if let Some(ref g) = group_id {
        params["groupId"] = serde_json::json!(g);
    }
    rpc.call::<serde_json::Value>("sendReaction", params).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_single_chunk() {
        assert_eq!(split_chunks("hello").len(), 1);
    }

    #[test]
    fn long_text_splits_on_word_boundary() {
        let word = "a".repeat(50);
        let text = std::iter::repeat(word).take(100).collect::<Vec<_>>().join(" ");
        let chunks = split_chunks(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }

    #[test]
    fn dm_chat_id_extracts_recipient() {
        let chat_id = ChatId::from("signal:dm:+15551234567");
        let (recipient, group) = recipient_of(&chat_id);
        assert_eq!(recipient.as_deref(), Some("+15551234567"));
        assert!(group.is_none());
    }

    #[test]
    fn group_chat_id_extracts_group_id() {
        let chat_id = ChatId::from("signal:group:abc123==");
        let (recipient, group) = recipient_of(&chat_id);
        assert!(recipient.is_none());
        assert_eq!(group.as_deref(), Some("abc123=="));
    }
}
