pub mod archive;
pub mod artifact;
pub mod config;
pub mod constants;
pub mod dump;
pub mod error;
pub mod orchestrator;
pub mod progress;

pub use error::{BackupError, Result};
pub use orchestrator::{BackupOrchestrator, OperationResult, OrchestratorConfig, RestoreOrder};
