pub mod audit;
pub mod backend;
pub mod output_validator;
pub mod plan;
pub mod repair;
pub mod run_log;
pub mod service;
pub mod workflows;

pub use audit::StoreAuditSink;
pub use backend::AgentBackend;
pub use output_validator::{OutputSchema, ValidationResult};
pub use plan::{Plan, PlanBuilder, PlanExecutor, PlanRun, RunContext, RunStatus, Step, StepKind, StepRef};
pub use repair::repair;
pub use run_log::RunLogger;
pub use service::{CollabService, Envelope};
pub use workflows::Workflows;
