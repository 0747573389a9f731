pub mod builder;
pub mod executor;
pub mod step;

pub use builder::PlanBuilder;
pub use executor::{PlanExecutor, PlanRun, RunContext, RunStatus};
pub use step::{Plan, PlanInput, Step, StepKind, StepRef};
