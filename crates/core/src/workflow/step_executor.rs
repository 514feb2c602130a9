use crate::capability::{CapabilityError, CapabilityInvoker};
use crate::config::EngineConfig;
use crate::events::{Event, EventLog, EventType};
use crate::metrics::MetricsCollector;
use crate::types::{RunId, StepDefinition, StepId};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Outcome of a single attempt at a step
#[derive(Debug, Clone)]
pub struct StepAttempt {
    pub step_id: StepId,
    pub attempt: u32,
    pub result: Result<serde_json::Value, CapabilityError>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Runs one attempt of a step against the capability invoker, with backoff
/// and timeout. Retry decisions belong to the runner.
pub struct StepExecutor {
    invoker: Arc<dyn CapabilityInvoker>,
    event_log: Arc<dyn EventLog>,
    metrics: Arc<MetricsCollector>,
    config: EngineConfig,
}

impl StepExecutor {
    pub fn new(
        invoker: Arc<dyn CapabilityInvoker>,
        event_log: Arc<dyn EventLog>,
        metrics: Arc<MetricsCollector>,
        config: EngineConfig,
    ) -> Self {
        Self {
            invoker,
            event_log,
            metrics,
            config,
        }
    }

    /// Execute one attempt. `parameters` must already be resolved.
    ///
    /// Only event-log failures surface as `Err`; capability failures are
    /// reported in the returned [`StepAttempt`].
    pub async fn execute(
        &self,
        run_id: RunId,
        step: &StepDefinition,
        parameters: serde_json::Value,
        attempt: u32,
    ) -> Result<StepAttempt> {
        let backoff = self.config.backoff_for(attempt);
        if !backoff.is_zero() {
            tracing::info!(
                "Retrying step {} after {:?} (attempt {})",
                step.id,
                backoff,
                attempt
            );
            tokio::time::sleep(backoff).await;
        }

        tracing::info!(
            "Executing step {} ({}.{}, attempt {}) for run {}",
            step.id,
            step.capability,
            step.action,
            attempt,
            run_id
        );

        self.event_log
            .append(Event::new(
                run_id,
                EventType::StepStarted {
                    step_id: step.id.clone(),
                    attempt,
                },
            ))
            .await?;

        let timeout_secs = step.timeout_secs.unwrap_or(self.config.default_timeout_secs);
        let start = tokio::time::Instant::now();

        let result = match timeout(
            Duration::from_secs(timeout_secs),
            self.invoker
                .invoke(&step.capability, &step.action, parameters),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Step {} timed out after {}s", step.id, timeout_secs);
                Err(CapabilityError::Timeout(timeout_secs))
            }
        };

        let duration = start.elapsed();
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome_label(),
        };
        self.metrics.record_capability_call(
            &step.capability,
            &step.action,
            outcome,
            duration.as_secs_f64() * 1000.0,
        );

        match &result {
            Ok(_) => {
                self.event_log
                    .append(Event::new(
                        run_id,
                        EventType::StepCompleted {
                            step_id: step.id.clone(),
                            duration_ms: duration.as_millis() as u64,
                        },
                    ))
                    .await?;
            }
            Err(e) => {
                tracing::warn!("Step {} failed on attempt {}: {}", step.id, attempt, e);
            }
        }

        Ok(StepAttempt {
            step_id: step.id.clone(),
            attempt,
            result,
            finished_at: Utc::now(),
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventLog;
    use serde_json::json;
    use std::collections::HashMap;

    struct SlowInvoker;

    #[async_trait::async_trait]
    impl CapabilityInvoker for SlowInvoker {
        async fn invoke(
            &self,
            _capability: &str,
            action: &str,
            parameters: serde_json::Value,
        ) -> Result<serde_json::Value, CapabilityError> {
            match action {
                "sleep" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(json!({}))
                }
                "boom" => Err(CapabilityError::Fatal("boom".to_string())),
                _ => Ok(parameters),
            }
        }
    }

    fn executor(log: Arc<MemoryEventLog>, metrics: Arc<MetricsCollector>) -> StepExecutor {
        StepExecutor::new(Arc::new(SlowInvoker), log, metrics, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_success_emits_events_and_metrics() {
        let log = Arc::new(MemoryEventLog::new());
        let metrics = Arc::new(MetricsCollector::new());
        let executor = executor(log.clone(), metrics.clone());
        let run_id = RunId::new();
        let step = StepDefinition::new("echo", "test", "echo");

        let attempt = executor
            .execute(run_id, &step, json!({"a": 1}), 1)
            .await
            .unwrap();

        assert_eq!(attempt.result, Ok(json!({"a": 1})));
        let events = log.get_run_events(run_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event_type, EventType::StepStarted { attempt: 1, .. }));
        assert!(matches!(events[1].event_type, EventType::StepCompleted { .. }));

        let calls = metrics.get_counter(
            "capability_calls_total",
            &HashMap::from([
                ("capability".to_string(), "test".to_string()),
                ("action".to_string(), "echo".to_string()),
                ("outcome".to_string(), "success".to_string()),
            ]),
        );
        assert_eq!(calls.unwrap().value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_capability_error() {
        let log = Arc::new(MemoryEventLog::new());
        let executor = executor(log, Arc::new(MetricsCollector::new()));
        let step = StepDefinition::new("slow", "test", "sleep").with_timeout(2);

        let attempt = executor
            .execute(RunId::new(), &step, json!({}), 1)
            .await
            .unwrap();

        assert_eq!(attempt.result, Err(CapabilityError::Timeout(2)));
        assert!(attempt.duration >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_before_retry() {
        let log = Arc::new(MemoryEventLog::new());
        let executor = executor(log, Arc::new(MetricsCollector::new()));
        let step = StepDefinition::new("fails", "test", "boom");

        let before = tokio::time::Instant::now();
        let attempt = executor
            .execute(RunId::new(), &step, json!({}), 3)
            .await
            .unwrap();

        // 250ms base doubled once for the third attempt
        assert!(before.elapsed() >= Duration::from_millis(500));
        assert!(matches!(attempt.result, Err(CapabilityError::Fatal(_))));
    }
}
