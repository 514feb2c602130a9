use super::dag::DataFlowGraph;
use crate::types::{ExecutionMode, StepDefinition, StepId, StepStatus, WorkflowRun};
use std::collections::HashMap;

/// Decides which steps of a run execute in the next batch
pub struct BatchScheduler {
    mode: ExecutionMode,
    dependencies: Vec<(StepId, Vec<StepId>)>,
    pipeline_order: Vec<StepId>,
}

impl BatchScheduler {
    pub fn new(
        mode: ExecutionMode,
        steps: &[StepDefinition],
        data_flow: &HashMap<StepId, String>,
    ) -> Self {
        let pipeline_order = match mode {
            ExecutionMode::Pipeline => DataFlowGraph::build(steps, data_flow).execution_order(),
            _ => steps.iter().map(|s| s.id.clone()).collect(),
        };

        Self {
            mode,
            dependencies: steps
                .iter()
                .map(|s| (s.id.clone(), s.dependencies.clone()))
                .collect(),
            pipeline_order,
        }
    }

    /// Order in which steps are considered
    pub fn order(&self) -> &[StepId] {
        &self.pipeline_order
    }

    /// Waiting steps whose dependencies are all Completed or Skipped, in
    /// declaration order. A dependency on an unknown step is never satisfied.
    pub fn ready_steps(&self, run: &WorkflowRun) -> Vec<StepId> {
        let statuses: HashMap<&StepId, StepStatus> =
            run.step_runs.iter().map(|s| (&s.id, s.status)).collect();

        self.dependencies
            .iter()
            .filter(|(id, deps)| {
                statuses.get(id) == Some(&StepStatus::Waiting)
                    && deps.iter().all(|dep| {
                        statuses
                            .get(dep)
                            .is_some_and(|status| status.satisfies_dependents())
                    })
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Steps to dispatch together. Empty while steps remain unresolved
    /// means the run cannot make progress.
    pub fn next_batch(&self, run: &WorkflowRun) -> Vec<StepId> {
        match self.mode {
            ExecutionMode::Sequential => self.ready_steps(run),
            ExecutionMode::Parallel => run
                .step_runs
                .iter()
                .filter(|s| s.status == StepStatus::Waiting)
                .map(|s| s.id.clone())
                .collect(),
            ExecutionMode::Pipeline => {
                let ready = self.ready_steps(run);
                self.pipeline_order
                    .iter()
                    .find(|id| ready.contains(id))
                    .cloned()
                    .into_iter()
                    .collect()
            }
        }
    }
}
