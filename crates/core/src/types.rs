use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Unique identifier for a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique identifier for a workflow step
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a workflow definition (template)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Status of a workflow step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Waiting,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Whether dependents may proceed past this step
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Whether the step will not run again in this run
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

/// How the runner forms batches of steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One dependency layer per batch
    #[default]
    Sequential,
    /// Every waiting step at once, no dependency gating
    Parallel,
    /// Topological order of the data-flow map, one step per batch
    Pipeline,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "pipeline" => Ok(Self::Pipeline),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

/// Precondition evaluated right before a step runs. A step whose
/// conditions do not all hold is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    VariableExists { variable: String },
    ResultExists { step: StepId },
    ApprovalRequired { message: String },
}

/// Retry budget for a step when neither the step, its capability, nor the
/// engine configuration provides one
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Specification for a single workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: StepId,
    /// Name of the external capability (tool prefix)
    pub capability: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    #[serde(default)]
    pub conditions: Vec<StepCondition>,
    /// Falls back to the capability, then engine default when unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, capability: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: StepId::new(id),
            capability: capability.into(),
            action: action.into(),
            parameters: serde_json::Map::new(),
            dependencies: Vec::new(),
            conditions: Vec::new(),
            timeout_secs: None,
            max_retries: None,
        }
    }

    /// Replace the parameters. Non-object values are ignored.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = parameters {
            self.parameters = map;
        }
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = StepId::new(dep);
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A workflow template. Runs copy the steps, so a definition can be shared
/// by any number of runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: ExecutionMode,
    pub steps: Vec<StepDefinition>,
    /// producer id -> comma-separated consumer ids
    #[serde(default)]
    pub data_flow: HashMap<StepId, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(id),
            name: name.into(),
            description: String::new(),
            mode: ExecutionMode::default(),
            steps: Vec::new(),
            data_flow: HashMap::new(),
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn flow(mut self, producer: impl Into<String>, consumers: impl Into<String>) -> Self {
        self.data_flow.insert(StepId::new(producer), consumers.into());
        self
    }
}

/// Per-run data shared between steps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    pub variables: HashMap<String, serde_json::Value>,
    pub step_results: BTreeMap<StepId, serde_json::Value>,
    pub error_log: Vec<String>,
}

/// Execution state of a workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub id: StepId,
    pub capability: String,
    pub action: String,
    pub status: StepStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub retries_remaining: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRun {
    pub fn waiting(step: &StepDefinition) -> Self {
        Self {
            id: step.id.clone(),
            capability: step.capability.clone(),
            action: step.action.clone(),
            status: StepStatus::Waiting,
            result: None,
            error: None,
            attempts: 0,
            retries_remaining: step.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            started_at: None,
            completed_at: None,
        }
    }
}

/// A specific execution of a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub mode: ExecutionMode,
    pub tags: Vec<String>,
    pub status: RunStatus,
    pub context: RunContext,
    /// Private copy of the definition's steps
    pub steps: Vec<StepDefinition>,
    pub data_flow: HashMap<StepId, String>,
    pub step_runs: Vec<StepRun>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration_secs: Option<f64>,
}

impl WorkflowRun {
    pub fn new(definition: &WorkflowDefinition, variables: HashMap<String, serde_json::Value>) -> Self {
        Self {
            id: RunId::new(),
            workflow_id: definition.id.clone(),
            name: definition.name.clone(),
            mode: definition.mode,
            tags: definition.tags.clone(),
            status: RunStatus::Pending,
            context: RunContext {
                variables,
                ..Default::default()
            },
            steps: definition.steps.clone(),
            data_flow: definition.data_flow.clone(),
            step_runs: definition.steps.iter().map(StepRun::waiting).collect(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_duration_secs: None,
        }
    }

    pub fn step_run(&self, id: &StepId) -> Option<&StepRun> {
        self.step_runs.iter().find(|s| &s.id == id)
    }

    pub fn step_run_mut(&mut self, id: &StepId) -> Option<&mut StepRun> {
        self.step_runs.iter_mut().find(|s| &s.id == id)
    }

    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.step_runs.iter().filter(|s| s.status == status).count()
    }

    /// Completed steps over total steps. A run with no steps counts as done.
    pub fn progress(&self) -> f64 {
        if self.step_runs.is_empty() {
            return 1.0;
        }
        self.count_with_status(StepStatus::Completed) as f64 / self.step_runs.len() as f64
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.step_runs.iter().all(|s| s.status.is_resolved())
    }

    pub fn unresolved_steps(&self) -> Vec<StepId> {
        self.step_runs
            .iter()
            .filter(|s| !s.status.is_resolved())
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn status_report(&self) -> RunStatusReport {
        RunStatusReport {
            run_id: self.id,
            workflow_id: self.workflow_id.clone(),
            name: self.name.clone(),
            status: self.status,
            progress: self.progress(),
            total_steps: self.step_runs.len(),
            completed_steps: self.count_with_status(StepStatus::Completed),
            failed_steps: self.count_with_status(StepStatus::Failed),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            total_duration_secs: self.total_duration_secs,
            steps: self
                .step_runs
                .iter()
                .map(|s| StepDetail {
                    id: s.id.clone(),
                    capability: s.capability.clone(),
                    action: s.action.clone(),
                    status: s.status,
                    attempts: s.attempts,
                    error: s.error.clone(),
                })
                .collect(),
            error_log: self.context.error_log.clone(),
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id,
            workflow_id: self.workflow_id.clone(),
            name: self.name.clone(),
            status: self.status,
            created_at: self.created_at,
            tags: self.tags.clone(),
            progress: self.progress(),
        }
    }
}

/// Answer to a status query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub status: RunStatus,
    pub progress: f64,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration_secs: Option<f64>,
    pub steps: Vec<StepDetail>,
    pub error_log: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDetail {
    pub id: StepId,
    pub capability: String,
    pub action: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Row in a run listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub progress: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_definition_deserialize_defaults() {
        let step: StepDefinition = serde_json::from_value(serde_json::json!({
            "id": "search_repo",
            "capability": "mcp__github__",
            "action": "search_repositories",
            "parameters": {"query": "{repo_query}"}
        }))
        .unwrap();

        assert_eq!(step.id.as_str(), "search_repo");
        assert!(step.max_retries.is_none());
        assert!(step.timeout_secs.is_none());
        assert!(step.dependencies.is_empty());
    }

    #[test]
    fn test_depends_on_ignores_duplicates() {
        let step = StepDefinition::new("b", "tool", "act").depends_on(["a", "a", "c"]);
        assert_eq!(step.dependencies, vec![StepId::new("a"), StepId::new("c")]);
    }

    #[test]
    fn test_zero_step_progress_is_complete() {
        let definition = WorkflowDefinition::new("empty", "Empty");
        let run = WorkflowRun::new(&definition, HashMap::new());
        assert_eq!(run.progress(), 1.0);
        assert!(run.is_fully_resolved());
    }

    #[test]
    fn test_run_copies_template_steps() {
        let definition = WorkflowDefinition::new("wf", "Workflow")
            .step(StepDefinition::new("a", "tool", "act").with_max_retries(2));
        let mut run = WorkflowRun::new(&definition, HashMap::new());
        run.steps[0].max_retries = Some(0);

        assert_eq!(definition.steps[0].max_retries, Some(2));
        assert_eq!(run.step_runs[0].retries_remaining, 2);
        assert_eq!(run.step_runs[0].status, StepStatus::Waiting);
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!("cancelled".parse::<RunStatus>().unwrap(), RunStatus::Cancelled);
        assert_eq!(RunStatus::Failed.to_string(), "failed");
        assert_eq!("pipeline".parse::<ExecutionMode>().unwrap(), ExecutionMode::Pipeline);
        assert!("bogus".parse::<RunStatus>().is_err());
    }
}
