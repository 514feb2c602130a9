use crate::types::StepId;
use thiserror::Error;

/// Errors surfaced by the workflow engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("step {step_id} failed after {attempts} attempt(s): {message}")]
    StepFailed {
        step_id: StepId,
        attempts: u32,
        message: String,
    },

    #[error("scheduling deadlock: no runnable steps among {}", join_ids(.steps))]
    SchedulingDeadlock { steps: Vec<StepId> },

    #[error("workflow template '{0}' not found")]
    TemplateNotFound(String),

    #[error("workflow cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TemplateNotFound(_))
    }
}

fn join_ids(steps: &[StepId]) -> String {
    let ids: Vec<&str> = steps.iter().map(|s| s.as_str()).collect();
    format!("[{}]", ids.join(", "))
}

pub type EngineResult<T> = Result<T, EngineError>;
