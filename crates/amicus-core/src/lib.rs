pub mod config;
pub mod error;
pub mod types;

pub use config::AmicusConfig;
pub use error::{AmicusError, Result};
pub use types::*;
