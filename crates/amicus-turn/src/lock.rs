use std::sync::Arc;

use amicus_core::ChatId;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

/// Per-chat serialization: only one turn may be generating a reply for a
/// given `ChatId` at a time (§4.B). Keys are created lazily and kept around
/// for the process lifetime — the memory cost is one empty `Mutex` per chat
/// ever seen, which is negligible next to the rest of the session state.
#[derive(Default)]
pub struct ChatLocks {
    locks: DashMap<ChatId, Arc<AsyncMutex<()>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, chat_id: &ChatId) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(chat_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Awaits exclusive access to `chat_id`, returning a guard that releases
    /// the lock on drop. Callers hold this for the decide-generate draft
    /// phase of one turn, release it across the post-draft human-like delay
    /// (§4.J.12), then re-acquire it for the staleness recheck and commit.
    pub async fn acquire(&self, chat_id: &ChatId) -> tokio::sync::OwnedMutexGuard<()> {
        self.handle(chat_id).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_for_first_release() {
        let locks = ChatLocks::new();
        let chat = ChatId::from("c1");

        let guard = locks.acquire(&chat).await;
        let locks = Arc::new(locks);
        let locks2 = locks.clone();
        let chat2 = chat.clone();
        let handle = tokio::spawn(async move {
            let _g = locks2.acquire(&chat2).await;
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "second turn must wait for the held lock");
        drop(guard);
        assert_eq!(handle.await.unwrap(), 42);
    }
}
