// Public modules
pub mod build;
pub mod completion;
pub mod config;
pub mod env;
pub mod error;
pub mod logs;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod session;
pub mod ssh;
pub mod summary;
pub mod task;
pub mod tasks;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use orchestrator::{ExecutionGroup, Orchestrator};
pub use report::OperationReport;
