//! Immutable workflow state snapshots
//!
//! State is never mutated in place: the orchestrator derives each snapshot from the
//! previous one with [`WorkflowEvent::apply`](crate::domain::event::WorkflowEvent::apply)
//! and publishes it to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    environment::InstanceId,
    job::{JobId, JobQueue},
    transaction::{JobOutcome, JobStatus, TransactionResult}
};

/// Phase of the current (or last) run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run has started since the last reset
    #[default]
    Idle,
    /// Jobs are being processed
    Running,
    /// Between two jobs, waiting for the environment to reload
    Reloading,
    /// Every job reached a terminal outcome
    Completed,
    /// The environment became unreachable and the remainder was abandoned
    Aborted
}

impl RunPhase {
    pub fn is_in_progress(self) -> bool {
        matches!(self, RunPhase::Running | RunPhase::Reloading)
    }
}

/// Aggregate of the job queue, outcome history and environment of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub phase:        RunPhase,
    pub run_id:       Option<String>,
    pub instance_id:  Option<InstanceId>,
    pub queue:        JobQueue,
    /// Outcomes so far, in input order
    pub outcomes:     Vec<JobOutcome>,
    /// Job currently being executed
    pub current_job:  Option<JobId>,
    pub fatal_reason: Option<String>,
    pub started_at:   Option<DateTime<Utc>>,
    pub finished_at:  Option<DateTime<Utc>>
}

impl WorkflowState {
    /// Index of the next job to run
    pub fn job_index(&self) -> usize {
        self.queue.cursor()
    }

    pub fn total_jobs(&self) -> usize {
        self.queue.total()
    }

    pub fn in_progress(&self) -> bool {
        self.phase.is_in_progress()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Record a terminal status for the job under the cursor
    pub(crate) fn record(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<TransactionResult>
    ) -> Option<WorkflowState> {
        if !self.phase.is_in_progress() || self.queue.current()?.id != *id {
            return None;
        }
        let mut next = self.clone();
        next.outcomes.push(JobOutcome { job_id: id.clone(), status, result });
        next.queue = self.queue.advanced();
        next.current_job = None;
        Some(next)
    }
}
