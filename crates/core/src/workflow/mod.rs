// DAG-based workflow execution engine

pub mod conditions;
pub mod dag;
pub mod executor;
pub mod resolver;
pub mod scheduler;
pub mod step_executor;

pub use conditions::{evaluate_conditions, ConditionOutcome};
pub use dag::{derive_data_flow, DataFlowGraph};
pub use executor::{RunHandle, WorkflowEngine};
pub use resolver::ParameterResolver;
pub use scheduler::BatchScheduler;
pub use step_executor::{StepAttempt, StepExecutor};
