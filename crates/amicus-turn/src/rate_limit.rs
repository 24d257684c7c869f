use std::time::Instant;

use amicus_core::ChatId;
use dashmap::DashMap;

/// A single token bucket: `capacity` tokens, refilled continuously at
/// `refill_per_second`. `try_take(1.0)` is the only consumption unit the
/// turn engine needs (§4.A: one send attempt costs one token).
#[derive(Debug)]
struct Bucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

impl Bucket {
    fn new(capacity: f64, refill_per_second: f64) -> Self {
        let now = Instant::now();
        Self {
            capacity,
            refill_per_second,
            tokens: capacity,
            last_refill: now,
            last_used: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, cost: f64) -> bool {
        let now = Instant::now();
        self.refill(now);
        self.last_used = now;
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// Global bucket plus one bucket per chat (§4.A). A send is only allowed
/// when both the global bucket and the chat's own bucket have a token.
/// Per-chat buckets idle out after `bucket_ttl_secs` to bound memory on a
/// long-running process with many one-off chats.
pub struct RateLimiter {
    global: std::sync::Mutex<Bucket>,
    per_chat: DashMap<ChatId, Bucket>,
    per_chat_capacity: f64,
    per_chat_refill_per_second: f64,
    bucket_ttl_secs: u64,
}

impl RateLimiter {
    pub fn new(
        global_capacity: f64,
        global_refill_per_second: f64,
        per_chat_capacity: f64,
        per_chat_refill_per_second: f64,
        bucket_ttl_secs: u64,
    ) -> Self {
        Self {
            global: std::sync::Mutex::new(Bucket::new(global_capacity, global_refill_per_second)),
            per_chat: DashMap::new(),
            per_chat_capacity,
            per_chat_refill_per_second,
            bucket_ttl_secs,
        }
    }

    /// Attempts to take one token from both the global and the chat bucket.
    /// Returns `false` (and takes nothing) if either is empty — this is a
    /// strict AND, not "whichever has room" (§4.A invariant).
    pub fn try_acquire(&self, chat_id: &ChatId) -> bool {
        let mut entry = self
            .per_chat
            .entry(chat_id.clone())
            .or_insert_with(|| Bucket::new(self.per_chat_capacity, self.per_chat_refill_per_second));
        if !entry.try_take(1.0) {
            return false;
        }
        drop(entry);

        let mut global = self.global.lock().unwrap();
        if global.try_take(1.0) {
            true
        } else {
            // Refund the chat-local token: the caller never gets to send.
            if let Some(mut e) = self.per_chat.get_mut(chat_id) {
                e.tokens = (e.tokens + 1.0).min(e.capacity);
            }
            false
        }
    }

    /// Evicts per-chat buckets untouched for longer than `bucket_ttl_secs`.
    pub fn sweep_idle(&self) {
        let ttl = std::time::Duration::from_secs(self.bucket_ttl_secs);
        let now = Instant::now();
        self.per_chat
            .retain(|_, bucket| now.duration_since(bucket.last_used) < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_refills() {
        let rl = RateLimiter::new(100.0, 100.0, 1.0, 0.001, 3600);
        let chat = ChatId::from("c1");
        assert!(rl.try_acquire(&chat));
        assert!(!rl.try_acquire(&chat), "per-chat bucket should be empty");
    }

    #[test]
    fn global_bucket_gates_across_chats() {
        let rl = RateLimiter::new(1.0, 0.001, 100.0, 100.0, 3600);
        let c1 = ChatId::from("c1");
        let c2 = ChatId::from("c2");
        assert!(rl.try_acquire(&c1));
        assert!(!rl.try_acquire(&c2), "global bucket should be exhausted");
    }

    #[test]
    fn sweep_idle_removes_stale_buckets() {
        let rl = RateLimiter::new(100.0, 100.0, 1.0, 1.0, 0);
        let chat = ChatId::from("c1");
        rl.try_acquire(&chat);
        assert_eq!(rl.per_chat.len(), 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        rl.sweep_idle();
        assert_eq!(rl.per_chat.len(), 0);
    }
}
