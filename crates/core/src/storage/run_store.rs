use crate::types::{RunId, RunStatus, WorkflowRun};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage for run snapshots, queried by the status API
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace a run. Returns the ids of runs evicted to make room.
    async fn save(&self, run: &WorkflowRun) -> Result<Vec<RunId>>;

    async fn get(&self, run_id: &RunId) -> Result<Option<WorkflowRun>>;

    /// All runs, optionally filtered by status, newest first
    async fn list(&self, status: Option<RunStatus>) -> Result<Vec<WorkflowRun>>;
}

/// Run store kept in process memory.
///
/// Unfinished runs are never evicted. Once more than `max_finished` runs
/// have reached a terminal status, the ones that finished earliest go first.
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, WorkflowRun>>,
    max_finished: usize,
}

impl InMemoryRunStore {
    pub fn new(max_finished: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            max_finished,
        }
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, run: &WorkflowRun) -> Result<Vec<RunId>> {
        let mut runs = self.runs.write().await;
        runs.insert(run.id, run.clone());

        // The run being saved is never a candidate, even with a limit of zero
        let mut finished: Vec<(RunId, chrono::DateTime<chrono::Utc>)> = runs
            .values()
            .filter(|r| r.status.is_terminal() && r.id != run.id)
            .map(|r| (r.id, r.completed_at.unwrap_or(r.created_at)))
            .collect();

        let total = finished.len() + usize::from(run.status.is_terminal());
        if total <= self.max_finished {
            return Ok(Vec::new());
        }

        finished.sort_by_key(|(_, at)| *at);
        let excess = (total - self.max_finished).min(finished.len());
        let evicted: Vec<RunId> = finished.into_iter().take(excess).map(|(id, _)| id).collect();
        for id in &evicted {
            runs.remove(id);
        }

        tracing::debug!(evicted = evicted.len(), "evicted finished runs");
        Ok(evicted)
    }

    async fn get(&self, run_id: &RunId) -> Result<Option<WorkflowRun>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn list(&self, status: Option<RunStatus>) -> Result<Vec<WorkflowRun>> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}
