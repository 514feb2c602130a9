use super::conditions::{evaluate_conditions, ConditionOutcome};
use super::dag::DataFlowGraph;
use super::resolver::ParameterResolver;
use super::scheduler::BatchScheduler;
use super::step_executor::{StepAttempt, StepExecutor};
use crate::capability::CapabilityInvoker;
use crate::config::{CapabilitySettings, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventLog, EventType, MemoryEventLog};
use crate::metrics::MetricsCollector;
use crate::storage::{InMemoryRunStore, RunStore};
use crate::template::{TemplateRegistry, TemplateSummary, WorkflowCatalog};
use crate::types::{
    ExecutionMode, RunId, RunStatus, RunStatusReport, RunSummary, StepDefinition, StepStatus,
    WorkflowDefinition, WorkflowRun,
};
use anyhow::anyhow;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CANCELLED_MESSAGE: &str = "Workflow cancelled";

/// Drives workflow runs: batches steps, invokes capabilities, tracks run
/// state and answers status queries.
///
/// Cloning is cheap; clones share the same runs, stores and sinks.
#[derive(Clone)]
pub struct WorkflowEngine {
    invoker: Arc<dyn CapabilityInvoker>,
    event_log: Arc<dyn EventLog>,
    run_store: Arc<dyn RunStore>,
    catalog: Arc<dyn WorkflowCatalog>,
    metrics: Arc<MetricsCollector>,
    capabilities: Arc<CapabilitySettings>,
    config: EngineConfig,
    // Track active runs for cancellation
    active_runs: Arc<RwLock<HashMap<RunId, CancellationToken>>>,
}

/// A run driven on a background task
pub struct RunHandle {
    pub run_id: RunId,
    task: JoinHandle<EngineResult<WorkflowRun>>,
}

impl RunHandle {
    /// Wait for the run to finish
    pub async fn wait(self) -> EngineResult<WorkflowRun> {
        self.task
            .await
            .map_err(|e| EngineError::Internal(anyhow::Error::from(e)))?
    }
}

impl WorkflowEngine {
    pub fn new(invoker: Arc<dyn CapabilityInvoker>, config: EngineConfig) -> Self {
        Self {
            invoker,
            event_log: Arc::new(MemoryEventLog::new()),
            run_store: Arc::new(InMemoryRunStore::new(config.max_retained_runs)),
            catalog: Arc::new(TemplateRegistry::builtin()),
            metrics: Arc::new(MetricsCollector::new()),
            capabilities: Arc::new(CapabilitySettings::default()),
            config,
            active_runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = event_log;
        self
    }

    pub fn with_run_store(mut self, run_store: Arc<dyn RunStore>) -> Self {
        self.run_store = run_store;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn WorkflowCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Per-capability defaults for steps that leave timeout or retries unset
    pub fn with_capabilities(mut self, capabilities: CapabilitySettings) -> Self {
        self.capabilities = Arc::new(capabilities);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Execute a workflow to completion and return the finished run.
    ///
    /// Step failures, deadlock and cancellation are recorded in the returned
    /// run. Only invalid definitions and host errors are returned as `Err`.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        variables: HashMap<String, serde_json::Value>,
    ) -> EngineResult<WorkflowRun> {
        let run = self.prepare(definition, variables)?;
        let token = self.register(run.id).await;
        self.drive(run, token).await
    }

    /// Register a run and drive it on a background task
    pub async fn start(
        &self,
        definition: &WorkflowDefinition,
        variables: HashMap<String, serde_json::Value>,
    ) -> EngineResult<RunHandle> {
        let run = self.prepare(definition, variables)?;
        let run_id = run.id;
        self.persist(&run).await?;
        let token = self.register(run_id).await;

        let engine = self.clone();
        let task = tokio::spawn(async move { engine.drive(run, token).await });

        Ok(RunHandle { run_id, task })
    }

    /// Look up a workflow definition in the catalog
    pub fn definition(&self, template_id: &str) -> EngineResult<WorkflowDefinition> {
        self.catalog
            .get(template_id)
            .ok_or_else(|| EngineError::TemplateNotFound(template_id.to_string()))
    }

    pub async fn execute_template(
        &self,
        template_id: &str,
        variables: HashMap<String, serde_json::Value>,
    ) -> EngineResult<WorkflowRun> {
        let definition = self.definition(template_id)?;
        self.execute(&definition, variables).await
    }

    pub async fn start_template(
        &self,
        template_id: &str,
        variables: HashMap<String, serde_json::Value>,
    ) -> EngineResult<RunHandle> {
        let definition = self.definition(template_id)?;
        self.start(&definition, variables).await
    }

    /// Catalog summaries, estimated with the limits runs would actually use
    pub fn templates(&self) -> Vec<TemplateSummary> {
        self.catalog
            .definitions()
            .iter()
            .map(|definition| TemplateSummary::from_definition(&self.with_step_defaults(definition)))
            .collect()
    }

    /// Status of a run; `None` when the id is unknown or no longer retained
    pub async fn get_status(&self, run_id: RunId) -> EngineResult<Option<RunStatusReport>> {
        Ok(self
            .run_store
            .get(&run_id)
            .await?
            .map(|run| run.status_report()))
    }

    pub async fn get_run(&self, run_id: RunId) -> EngineResult<Option<WorkflowRun>> {
        Ok(self.run_store.get(&run_id).await?)
    }

    /// Summaries of retained runs, newest first
    pub async fn list_runs(&self, status: Option<RunStatus>) -> EngineResult<Vec<RunSummary>> {
        Ok(self
            .run_store
            .list(status)
            .await?
            .iter()
            .map(WorkflowRun::summary)
            .collect())
    }

    pub async fn get_run_events(&self, run_id: RunId) -> EngineResult<Vec<Event>> {
        Ok(self.event_log.get_run_events(run_id).await?)
    }

    /// Request cancellation of an active run. Returns false when the run is
    /// unknown, already finished or already cancelled.
    pub async fn cancel(&self, run_id: RunId) -> bool {
        let active_runs = self.active_runs.read().await;

        match active_runs.get(&run_id) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                tracing::info!("Cancellation signal sent for run {}", run_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel every active run and flush the event log
    pub async fn shutdown(&self) -> EngineResult<()> {
        let active: Vec<RunId> = self.active_runs.read().await.keys().copied().collect();
        for run_id in active {
            self.cancel(run_id).await;
        }
        self.event_log.flush().await?;
        tracing::info!("Workflow engine shut down");
        Ok(())
    }

    /// Validate a definition and build a pending run from it
    fn prepare(
        &self,
        definition: &WorkflowDefinition,
        variables: HashMap<String, serde_json::Value>,
    ) -> EngineResult<WorkflowRun> {
        validate_definition(definition)?;
        let definition = self.with_step_defaults(definition);
        Ok(WorkflowRun::new(&definition, variables))
    }

    /// Fill unset step timeouts and retry budgets from the capability
    /// settings, then the engine configuration
    fn with_step_defaults(&self, definition: &WorkflowDefinition) -> WorkflowDefinition {
        let mut definition = definition.clone();
        for step in &mut definition.steps {
            let capability = self.capabilities.get(&step.capability);
            step.timeout_secs.get_or_insert_with(|| {
                capability.map_or(self.config.default_timeout_secs, |c| c.timeout_secs)
            });
            step.max_retries.get_or_insert_with(|| {
                capability.map_or(self.config.default_max_retries, |c| c.retry_count)
            });
        }
        definition
    }

    async fn register(&self, run_id: RunId) -> CancellationToken {
        let token = CancellationToken::new();
        self.active_runs.write().await.insert(run_id, token.clone());
        token
    }

    async fn drive(&self, mut run: WorkflowRun, token: CancellationToken) -> EngineResult<WorkflowRun> {
        let run_id = run.id;
        tracing::info!(
            "Starting workflow execution: run_id={}, workflow={}, mode={:?}",
            run_id,
            run.workflow_id,
            run.mode
        );

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        self.metrics.increment_counter("runs_started_total", HashMap::new());
        self.metrics.add_to_gauge("active_runs", 1.0, HashMap::new());

        let outcome = match self.begin(&run).await {
            Ok(()) => self.run_batches(&mut run, &token).await,
            Err(e) => Err(e),
        };

        // Deregister only after the terminal status is stored
        let finished = self.finish(&mut run, outcome).await;
        self.active_runs.write().await.remove(&run_id);
        self.metrics.add_to_gauge("active_runs", -1.0, HashMap::new());

        finished?;
        Ok(run)
    }

    async fn begin(&self, run: &WorkflowRun) -> EngineResult<()> {
        self.event_log
            .append(Event::new(
                run.id,
                EventType::RunStarted {
                    workflow_id: run.workflow_id.clone(),
                    mode: run.mode,
                    step_count: run.steps.len(),
                },
            ))
            .await?;
        self.persist(run).await
    }

    /// Dispatch batches until every step is resolved or the run stops
    async fn run_batches(&self, run: &mut WorkflowRun, token: &CancellationToken) -> EngineResult<()> {
        let run_id = run.id;
        let scheduler = BatchScheduler::new(run.mode, &run.steps, &run.data_flow);
        let graph = match run.mode {
            ExecutionMode::Pipeline => Some(DataFlowGraph::build(&run.steps, &run.data_flow)),
            _ => None,
        };
        if graph.as_ref().is_some_and(DataFlowGraph::has_cycle) {
            tracing::warn!("Run {} data flow has a cycle, falling back to step order", run_id);
        }
        let executor = StepExecutor::new(
            self.invoker.clone(),
            self.event_log.clone(),
            self.metrics.clone(),
            self.config.clone(),
        );

        loop {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if run.is_fully_resolved() {
                return Ok(());
            }

            let batch = scheduler.next_batch(run);
            if batch.is_empty() {
                return Err(EngineError::SchedulingDeadlock {
                    steps: run.unresolved_steps(),
                });
            }

            tracing::debug!("Run {} dispatching batch {:?}", run_id, batch);
            self.event_log
                .append(Event::new(
                    run_id,
                    EventType::BatchScheduled {
                        steps: batch.clone(),
                    },
                ))
                .await?;

            let mut dispatched: Vec<(StepDefinition, serde_json::Value, u32)> = Vec::new();
            for step_id in &batch {
                let step = run
                    .steps
                    .iter()
                    .find(|s| &s.id == step_id)
                    .cloned()
                    .ok_or_else(|| anyhow!("step {} missing from run {}", step_id, run_id))?;

                // Conditions gate the first attempt only; retries reuse the verdict
                let first_attempt = run.step_run(&step.id).map_or(true, |s| s.attempts == 0);
                if first_attempt {
                    match evaluate_conditions(&step.conditions, &run.context) {
                        ConditionOutcome::Skip { reason } => {
                            self.skip_step(run, &step, reason).await?;
                            continue;
                        }
                        ConditionOutcome::Run { approvals } => {
                            for message in approvals {
                                self.event_log
                                    .append(Event::new(
                                        run_id,
                                        EventType::ApprovalGranted {
                                            step_id: step.id.clone(),
                                            message,
                                        },
                                    ))
                                    .await?;
                            }
                        }
                    }
                }

                let parameters = step_parameters(run, &step, graph.as_ref());
                let step_run = run
                    .step_run_mut(&step.id)
                    .ok_or_else(|| anyhow!("step {} missing from run {}", step.id, run_id))?;
                step_run.status = StepStatus::Running;
                step_run.attempts += 1;
                step_run.started_at.get_or_insert_with(Utc::now);
                let attempt = step_run.attempts;

                dispatched.push((step, parameters, attempt));
            }

            self.persist(run).await?;
            if dispatched.is_empty() {
                continue;
            }

            let attempts = {
                let futures = dispatched.iter().map(|(step, parameters, attempt)| {
                    executor.execute(run_id, step, parameters.clone(), *attempt)
                });
                tokio::select! {
                    results = join_all(futures) => results,
                    _ = token.cancelled() => return Err(EngineError::Cancelled),
                }
            };

            // Record every outcome of the batch before acting on a failure
            let mut failure = None;
            for attempt in attempts {
                if let Some(error) = self.apply_attempt(run, attempt?).await? {
                    failure.get_or_insert(error);
                }
            }

            self.persist(run).await?;
            if let Some(error) = failure {
                return Err(error);
            }
        }
    }

    async fn skip_step(
        &self,
        run: &mut WorkflowRun,
        step: &StepDefinition,
        reason: String,
    ) -> EngineResult<()> {
        tracing::info!("Skipping step {}: {}", step.id, reason);

        if let Some(step_run) = run.step_run_mut(&step.id) {
            step_run.status = StepStatus::Skipped;
            step_run.completed_at = Some(Utc::now());
        }

        self.event_log
            .append(Event::new(
                run.id,
                EventType::StepSkipped {
                    step_id: step.id.clone(),
                    reason,
                },
            ))
            .await?;
        Ok(())
    }

    /// Fold one attempt into the run. Returns the error that ends the run
    /// when the step has failed for good.
    async fn apply_attempt(
        &self,
        run: &mut WorkflowRun,
        attempt: StepAttempt,
    ) -> EngineResult<Option<EngineError>> {
        let run_id = run.id;
        let step_run = run
            .step_runs
            .iter_mut()
            .find(|s| s.id == attempt.step_id)
            .ok_or_else(|| anyhow!("step {} missing from run {}", attempt.step_id, run_id))?;

        match attempt.result {
            Ok(value) => {
                step_run.status = StepStatus::Completed;
                step_run.result = Some(value.clone());
                step_run.error = None;
                step_run.completed_at = Some(attempt.finished_at);
                run.context.step_results.insert(attempt.step_id, value);
                Ok(None)
            }
            Err(error) => {
                let message = error.to_string();
                let will_retry = error.is_retryable() && step_run.retries_remaining > 0;

                step_run.error = Some(message.clone());
                if will_retry {
                    step_run.retries_remaining -= 1;
                    step_run.status = StepStatus::Waiting;
                } else {
                    step_run.status = StepStatus::Failed;
                    step_run.completed_at = Some(attempt.finished_at);
                }
                let attempts = step_run.attempts;

                self.event_log
                    .append(Event::new(
                        run_id,
                        EventType::StepFailed {
                            step_id: attempt.step_id.clone(),
                            error: message.clone(),
                            attempt: attempt.attempt,
                            will_retry,
                        },
                    ))
                    .await?;

                if will_retry {
                    return Ok(None);
                }

                tracing::error!(
                    "Step {} failed after {} attempt(s): {}",
                    attempt.step_id,
                    attempts,
                    message
                );
                run.context
                    .error_log
                    .push(format!("Step {}: {}", attempt.step_id, message));
                Ok(Some(EngineError::StepFailed {
                    step_id: attempt.step_id,
                    attempts,
                    message,
                }))
            }
        }
    }

    /// Set the terminal status, emit the closing event and store the run
    async fn finish(&self, run: &mut WorkflowRun, outcome: EngineResult<()>) -> EngineResult<()> {
        let completed_at = Utc::now();
        let duration_secs = run
            .started_at
            .map(|started| started.elapsed_seconds_from(completed_at))
            .unwrap_or(0.0);
        run.completed_at = Some(completed_at);
        run.total_duration_secs = Some(duration_secs);

        let mut host_error = None;
        let event = match outcome {
            Ok(()) => {
                run.status = RunStatus::Completed;
                tracing::info!("Workflow execution completed: run_id={}", run.id);
                EventType::RunCompleted { duration_secs }
            }
            Err(EngineError::Cancelled) => {
                run.status = RunStatus::Cancelled;
                for step_run in &mut run.step_runs {
                    if step_run.status == StepStatus::Running {
                        step_run.status = StepStatus::Failed;
                        step_run.error = Some(CANCELLED_MESSAGE.to_string());
                        step_run.completed_at = Some(completed_at);
                    }
                }
                run.context.error_log.push(CANCELLED_MESSAGE.to_string());
                tracing::warn!("Workflow execution cancelled: run_id={}", run.id);
                EventType::RunCancelled {
                    reason: CANCELLED_MESSAGE.to_string(),
                }
            }
            Err(e) => {
                run.status = RunStatus::Failed;
                // Step failures already logged their own entry
                if !matches!(e, EngineError::StepFailed { .. }) {
                    run.context.error_log.push(e.to_string());
                }
                tracing::error!("Workflow execution failed: run_id={}, error={}", run.id, e);
                let event = EventType::RunFailed {
                    error: e.to_string(),
                    duration_secs,
                };
                if let EngineError::Internal(e) = e {
                    host_error = Some(e);
                }
                event
            }
        };

        self.metrics.increment_counter(
            "runs_finished_total",
            HashMap::from([("status".to_string(), run.status.to_string())]),
        );
        self.event_log.append(Event::new(run.id, event)).await?;
        self.persist(run).await?;

        match host_error {
            Some(e) => Err(EngineError::Internal(e)),
            None => Ok(()),
        }
    }

    /// Save a snapshot and drop the events of any run evicted to make room
    async fn persist(&self, run: &WorkflowRun) -> EngineResult<()> {
        for evicted in self.run_store.save(run).await? {
            self.event_log.forget_run(evicted).await?;
        }
        Ok(())
    }
}

/// Reject definitions the runner cannot address unambiguously
fn validate_definition(definition: &WorkflowDefinition) -> EngineResult<()> {
    let mut seen = HashSet::new();
    for step in &definition.steps {
        if step.id.as_str().trim().is_empty() {
            return Err(EngineError::InvalidDefinition(format!(
                "workflow '{}' has a step with an empty id",
                definition.id
            )));
        }
        if !seen.insert(&step.id) {
            return Err(EngineError::InvalidDefinition(format!(
                "workflow '{}' has duplicate step id '{}'",
                definition.id, step.id
            )));
        }
    }
    Ok(())
}

/// Resolved parameters for the next attempt. In pipeline mode the object
/// results of the step's producers fill in any key the step does not set.
fn step_parameters(
    run: &WorkflowRun,
    step: &StepDefinition,
    graph: Option<&DataFlowGraph>,
) -> serde_json::Value {
    let mut resolved = ParameterResolver::resolve(&step.parameters, &run.context);

    if let Some(graph) = graph {
        for producer in graph.producers(&step.id) {
            if let Some(serde_json::Value::Object(fields)) = run.context.step_results.get(&producer) {
                for (key, value) in fields {
                    resolved.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
    }

    serde_json::Value::Object(resolved)
}

// Helper trait for duration calculation
trait ElapsedSeconds {
    fn elapsed_seconds_from(&self, other: chrono::DateTime<Utc>) -> f64;
}

impl ElapsedSeconds for chrono::DateTime<Utc> {
    fn elapsed_seconds_from(&self, other: chrono::DateTime<Utc>) -> f64 {
        (other - *self).num_milliseconds() as f64 / 1000.0
    }
}
