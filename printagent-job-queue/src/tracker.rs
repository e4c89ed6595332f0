//! Bounded in-memory history of handled jobs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{JobRun, JobStatus};

/// Maximum number of job runs to keep in memory.
const MAX_JOB_RUNS: usize = 1000;

#[derive(Debug, Default)]
struct TrackerState {
    /// Oldest first.
    order: VecDeque<Uuid>,
    runs: HashMap<Uuid, JobRun>,
}

impl TrackerState {
    fn insert(&mut self, run: JobRun) {
        let id = run.id;
        if self.runs.insert(id, run).is_none() {
            self.order.push_back(id);
        }

        while self.order.len() > MAX_JOB_RUNS {
            if let Some(old_id) = self.order.pop_front() {
                self.runs.remove(&old_id);
            }
        }
    }

    fn iter_recent(&self) -> impl Iterator<Item = &JobRun> {
        self.order.iter().rev().filter_map(|id| self.runs.get(id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobTracker {
    state: Arc<RwLock<TrackerState>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a run.
    pub async fn record(&self, run: &JobRun) {
        let mut state = self.state.write().await;
        state.insert(run.clone());
    }

    pub async fn get(&self, id: Uuid) -> Option<JobRun> {
        let state = self.state.read().await;
        state.runs.get(&id).cloned()
    }

    /// Most recent first, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>, limit: usize) -> Vec<JobRun> {
        let state = self.state.read().await;
        state
            .iter_recent()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn count(&self, status: Option<JobStatus>) -> usize {
        let state = self.state.read().await;
        match status {
            Some(s) => state.runs.values().filter(|r| r.status == s).count(),
            None => state.runs.len(),
        }
    }
}
