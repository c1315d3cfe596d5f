// Public modules
pub mod api;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod plan;

// Re-export common types for convenience
pub use compiler::{compile, compile_with};
pub use error::{Error, ErrorCode, FailureStage, Result};
pub use executor::{dry_run, ExecutionReport, Executor, PlanPreview};
pub use plan::{Operation, OperationId, OperationKind, Plan};
