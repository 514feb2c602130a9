use crate::types::*;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// An event in a run's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(run_id: RunId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events emitted by the runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    // Run lifecycle events
    RunStarted {
        workflow_id: WorkflowId,
        mode: ExecutionMode,
        step_count: usize,
    },
    RunCompleted {
        duration_secs: f64,
    },
    RunFailed {
        error: String,
        duration_secs: f64,
    },
    RunCancelled {
        reason: String,
    },

    // Step lifecycle events
    BatchScheduled {
        steps: Vec<StepId>,
    },
    StepStarted {
        step_id: StepId,
        attempt: u32,
    },
    StepCompleted {
        step_id: StepId,
        duration_ms: u64,
    },
    StepFailed {
        step_id: StepId,
        error: String,
        attempt: u32,
        will_retry: bool,
    },
    StepSkipped {
        step_id: StepId,
        reason: String,
    },
    ApprovalGranted {
        step_id: StepId,
        message: String,
    },
}

/// Sink for run events, injected into the engine. Created at process start
/// and flushed at shutdown.
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the log
    async fn append(&self, event: Event) -> Result<()>;

    /// Get all events for a run
    async fn get_run_events(&self, run_id: RunId) -> Result<Vec<Event>>;

    /// Drop the events of a run that is no longer retained
    async fn forget_run(&self, _run_id: RunId) -> Result<()> {
        Ok(())
    }

    /// Push buffered events to their destination
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Event log kept in process memory, grouped by run
#[derive(Default)]
pub struct MemoryEventLog {
    events: RwLock<HashMap<RunId, Vec<Event>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        tracing::debug!(run_id = %event.run_id, event = ?event.event_type, "run event");
        self.events
            .write()
            .await
            .entry(event.run_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn get_run_events(&self, run_id: RunId) -> Result<Vec<Event>> {
        let mut events = self
            .events
            .read()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn forget_run(&self, run_id: RunId) -> Result<()> {
        self.events.write().await.remove(&run_id);
        Ok(())
    }
}
