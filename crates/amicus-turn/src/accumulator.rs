use std::sync::Arc;
use std::time::{Duration, Instant};

use amicus_core::{ChatId, IncomingMessage, Mentioned};
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

struct PendingBatch {
    messages: Vec<IncomingMessage>,
    first_push: Instant,
    last_push: Instant,
}

#[derive(Default)]
struct ChatAccumulator {
    state: AsyncMutex<Option<PendingBatch>>,
}

/// Debounced per-chat message accumulator (§4.C).
///
/// The first message for an idle chat starts a debounce window of
/// `debounce_ms`; every further message that arrives before the window
/// closes resets it, up to a hard cap of `debounce_ms * max_multiplier`
/// measured from the first message — so one chatty correspondent can't
/// defer a reply forever. The caller that submits the first message in a
/// window becomes the one that awaits and returns the finished batch;
/// every later submitter in the same window gets `None` back immediately.
pub struct Accumulator {
    chats: DashMap<ChatId, Arc<ChatAccumulator>>,
    debounce_ms: u64,
    max_multiplier: u64,
}

impl Accumulator {
    pub fn new(debounce_ms: u64, max_multiplier: u64) -> Self {
        Self {
            chats: DashMap::new(),
            debounce_ms,
            max_multiplier,
        }
    }

    fn handle(&self, chat_id: &ChatId) -> Arc<ChatAccumulator> {
        self.chats
            .entry(chat_id.clone())
            .or_insert_with(|| Arc::new(ChatAccumulator::default()))
            .clone()
    }

    /// Submits one message into the accumulator for its chat. Returns
    /// `Some(batch)` only to the caller that ends up draining the window.
    pub async fn submit(&self, msg: IncomingMessage) -> Option<Vec<IncomingMessage>> {
        let chat_id = msg.chat_id.clone();
        let acc = self.handle(&chat_id);
        let now = Instant::now();

        let became_collector = {
            let mut state = acc.state.lock().await;
            match state.as_mut() {
                Some(batch) => {
                    batch.messages.push(msg);
                    batch.last_push = now;
                    false
                }
                None => {
                    *state = Some(PendingBatch {
                        messages: vec![msg],
                        first_push: now,
                        last_push: now,
                    });
                    true
                }
            }
        };

        if !became_collector {
            return None;
        }

        Some(self.collect(&acc).await)
    }

    async fn collect(&self, acc: &ChatAccumulator) -> Vec<IncomingMessage> {
        let debounce = Duration::from_millis(self.debounce_ms);
        let hard_cap = debounce * self.max_multiplier as u32;
        loop {
            tokio::time::sleep(debounce).await;
            let mut state = acc.state.lock().await;
            let Some(batch) = state.as_ref() else {
                return Vec::new();
            };
            let now = Instant::now();
            let idle = now.duration_since(batch.last_push);
            let total = now.duration_since(batch.first_push);
            if idle >= debounce || total >= hard_cap {
                return state.take().unwrap().messages;
            }
        }
    }
}

/// Folds `Mentioned` across a batch per §4.D's "OR across the batch" rule.
pub fn merged_mentioned(batch: &[IncomingMessage]) -> Mentioned {
    batch
        .iter()
        .fold(Mentioned::Unknown, |acc, m| acc.or(m.mentioned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use amicus_core::Channel;

    fn msg(chat: &str, text: &str, mentioned: Mentioned) -> IncomingMessage {
        IncomingMessage {
            channel: Channel::Signal,
            chat_id: ChatId::from(chat),
            message_id: amicus_core::MessageId::new(),
            author_id: "a1".into(),
            author_display_name: None,
            text: text.into(),
            attachments: vec![],
            is_group: false,
            is_operator: false,
            mentioned,
            timestamp_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_submitter_gets_none_first_gets_batch() {
        let acc = Accumulator::new(50, 3);
        let acc = Arc::new(acc);

        let acc2 = acc.clone();
        let collector = tokio::spawn(async move { acc2.submit(msg("c1", "hi", Mentioned::Unknown)).await });

        tokio::time::advance(Duration::from_millis(5)).await;
        let second = acc.submit(msg("c1", "there", Mentioned::Yes)).await;
        assert!(second.is_none());

        tokio::time::advance(Duration::from_millis(100)).await;
        let batch = collector.await.unwrap().expect("collector must get the batch");
        assert_eq!(batch.len(), 2);
        assert!(merged_mentioned(&batch).is_yes());
    }

    #[tokio::test(start_paused = true)]
    async fn hard_cap_forces_drain_under_sustained_traffic() {
        let acc = Arc::new(Accumulator::new(50, 2));
        let acc2 = acc.clone();
        let collector = tokio::spawn(async move { acc2.submit(msg("c1", "1", Mentioned::Unknown)).await });

        for i in 0..10 {
            tokio::time::advance(Duration::from_millis(20)).await;
            acc.submit(msg("c1", &format!("msg{i}"), Mentioned::Unknown)).await;
        }
        tokio::time::advance(Duration::from_millis(200)).await;
        let batch = collector.await.unwrap().expect("hard cap must eventually drain");
        assert!(!batch.is_empty());
    }
}
