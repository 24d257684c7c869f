pub mod accumulator;
pub mod behavior;
pub mod delay;
pub mod engine;
pub mod error;
pub mod lock;
pub mod proactive;
pub mod rate_limit;

pub use accumulator::{merged_mentioned, Accumulator};
pub use behavior::{BehaviorDecision, BehaviorEngine};
pub use delay::{sample_human_delay_ms, DelayKind};
pub use engine::{Generator, TurnBatch, TurnEngine};
pub use error::{Result, TurnError};
pub use lock::ChatLocks;
pub use rate_limit::RateLimiter;
