pub mod config;
pub mod error;
pub mod log;
pub mod core;
pub mod orchestration;
pub mod store;
pub mod util;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestration::{IngestOptions, Orchestrator, TaskEngine, Version};
pub use store::Store;
