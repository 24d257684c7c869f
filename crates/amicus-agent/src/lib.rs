pub mod anthropic;
pub mod backend;
pub mod context;
pub mod generation;
pub mod prompt;
pub mod quality;
pub mod scripted;
pub mod slop;
pub mod tools;
pub mod turn_generator;

pub use anthropic::AnthropicBackend;
pub use backend::{BackendError, LLMBackend};
pub use scripted::ScriptedBackend;
pub use turn_generator::TurnGenerator;
