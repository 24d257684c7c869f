pub mod db;
pub mod dirty;
pub mod error;
pub mod feedback;
pub mod manager;
pub mod mirror;
pub mod search;
pub mod types;

pub use dirty::DirtyQueue;
pub use error::{MemoryError, Result};
pub use feedback::FeedbackStore;
pub use manager::{derive_trust_tier, MemoryManager};
pub use search::Embedder;
pub use types::*;
