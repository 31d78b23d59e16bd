pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod plugins;
pub mod progress;
pub mod scanner;
pub mod storage;

pub use config::{AppConfig, Backend, ScanOptions};
pub use engine::{ScanEngine, ScanSummary};
pub use error::{Error, Result};
pub use hasher::registry::ChecksumRegistry;
pub use plugins::{ContentPlugin, PluginContext};
pub use progress::{ProgressReporter, SilentReporter};
pub use storage::{Database, MemoryStore, Store};
