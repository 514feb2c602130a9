use crate::types::{RunContext, StepCondition};

/// Outcome of checking a step's conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Run {
        /// Approval messages that were granted on the way
        approvals: Vec<String>,
    },
    Skip {
        reason: String,
    },
}

/// Check every condition in order; the first one that does not hold skips the step.
///
/// Approvals are granted automatically, there is no interactive approver.
pub fn evaluate_conditions(conditions: &[StepCondition], context: &RunContext) -> ConditionOutcome {
    let mut approvals = Vec::new();

    for condition in conditions {
        match condition {
            StepCondition::VariableExists { variable } => {
                if !context.variables.contains_key(variable) {
                    return ConditionOutcome::Skip {
                        reason: format!("variable '{}' is not set", variable),
                    };
                }
            }
            StepCondition::ResultExists { step } => {
                if !context.step_results.contains_key(step) {
                    return ConditionOutcome::Skip {
                        reason: format!("step '{}' produced no result", step),
                    };
                }
            }
            StepCondition::ApprovalRequired { message } => {
                approvals.push(message.clone());
            }
        }
    }

    ConditionOutcome::Run { approvals }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepId;
    use serde_json::json;

    #[test]
    fn test_no_conditions_runs() {
        let outcome = evaluate_conditions(&[], &RunContext::default());
        assert_eq!(outcome, ConditionOutcome::Run { approvals: vec![] });
    }

    #[test]
    fn test_missing_variable_skips() {
        let outcome = evaluate_conditions(
            &[StepCondition::VariableExists {
                variable: "org_id".to_string(),
            }],
            &RunContext::default(),
        );
        assert!(matches!(outcome, ConditionOutcome::Skip { reason } if reason.contains("org_id")));
    }

    #[test]
    fn test_approval_and_result_conditions() {
        let mut context = RunContext::default();
        context
            .step_results
            .insert(StepId::new("analyze_repo"), json!({"ok": true}));

        let outcome = evaluate_conditions(
            &[
                StepCondition::ResultExists {
                    step: StepId::new("analyze_repo"),
                },
                StepCondition::ApprovalRequired {
                    message: "Create a new project?".to_string(),
                },
            ],
            &context,
        );
        assert_eq!(
            outcome,
            ConditionOutcome::Run {
                approvals: vec!["Create a new project?".to_string()]
            }
        );
    }
}
