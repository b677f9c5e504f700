//! 行动流水线：Router、Action Planner、Task Executor 状态机、Action Executor

pub mod action_executor;
pub mod action_planner;
pub mod router;
pub mod task_executor;
pub mod types;

pub use action_executor::ActionExecutor;
pub use action_planner::plan_tasks;
pub use router::{classify, Mode};
pub use task_executor::{advance, decompose, install_subtasks, DecompositionRequest, FailureContext, TaskStep};
pub use types::{ItemDraft, OrchestrationState, PlanItem, PlanStatus};
