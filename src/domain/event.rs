//! Workflow events and the progress notifications derived from them
//!
//! Every change to [`WorkflowState`] is expressed as a [`WorkflowEvent`] applied by a pure
//! transition function. A subset of events is broadcast to controllers as
//! [`ProgressEvent`]s.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    environment::InstanceId,
    job::{Job, JobId, JobQueue},
    state::{RunPhase, WorkflowState},
    transaction::{FailureReason, JobOutcome, JobStatus, TransactionResult}
};

/// Unified event enum for all state changes of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    RunStarted { run_id: String, instance_id: InstanceId, jobs: Vec<Job>, at: DateTime<Utc> },
    JobStarted { id: JobId },
    JobSucceeded { id: JobId, result: TransactionResult },
    JobFailed { id: JobId, reason: FailureReason, result: Option<TransactionResult> },
    JobAmbiguous { id: JobId, result: TransactionResult },
    ReloadStarted,
    ReloadCompleted,
    WorkflowComplete { outcomes: Vec<JobOutcome> },
    FatalError { reason: String },
    Reset
}

impl Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let event_type = match self {
            WorkflowEvent::RunStarted { .. } => "RunStarted",
            WorkflowEvent::JobStarted { .. } => "JobStarted",
            WorkflowEvent::JobSucceeded { .. } => "JobSucceeded",
            WorkflowEvent::JobFailed { .. } => "JobFailed",
            WorkflowEvent::JobAmbiguous { .. } => "JobAmbiguous",
            WorkflowEvent::ReloadStarted => "ReloadStarted",
            WorkflowEvent::ReloadCompleted => "ReloadCompleted",
            WorkflowEvent::WorkflowComplete { .. } => "WorkflowComplete",
            WorkflowEvent::FatalError { .. } => "FatalError",
            WorkflowEvent::Reset => "Reset"
        };
        write!(f, "{}", event_type)
    }
}

impl WorkflowEvent {
    /// Apply this event to the current state to produce a new state
    ///
    /// Returns None if the event cannot be applied in the current phase.
    pub fn apply(&self, current: &WorkflowState) -> Option<WorkflowState> {
        match self {
            WorkflowEvent::RunStarted { run_id, instance_id, jobs, at } => {
                if current.phase.is_in_progress() {
                    return None;
                }
                let queue = JobQueue::new(jobs.clone()).ok()?;
                Some(WorkflowState {
                    phase: RunPhase::Running,
                    run_id: Some(run_id.clone()),
                    instance_id: Some(instance_id.clone()),
                    queue,
                    outcomes: Vec::new(),
                    current_job: None,
                    fatal_reason: None,
                    started_at: Some(*at),
                    finished_at: None
                })
            }
            WorkflowEvent::JobStarted { id } => {
                if current.phase != RunPhase::Running || current.queue.current()?.id != *id {
                    return None;
                }
                let mut next = current.clone();
                next.current_job = Some(id.clone());
                Some(next)
            }
            WorkflowEvent::JobSucceeded { id, result } => {
                current.record(id, JobStatus::Succeeded, Some(result.clone()))
            }
            WorkflowEvent::JobFailed { id, reason, result } => {
                current.record(id, JobStatus::Failed { reason: reason.clone() }, result.clone())
            }
            WorkflowEvent::JobAmbiguous { id, result } => {
                current.record(id, JobStatus::Ambiguous, Some(result.clone()))
            }
            WorkflowEvent::ReloadStarted => {
                if current.phase != RunPhase::Running {
                    return None;
                }
                let mut next = current.clone();
                next.phase = RunPhase::Reloading;
                Some(next)
            }
            WorkflowEvent::ReloadCompleted => {
                if current.phase != RunPhase::Reloading {
                    return None;
                }
                let mut next = current.clone();
                next.phase = RunPhase::Running;
                Some(next)
            }
            WorkflowEvent::WorkflowComplete { .. } => {
                if current.phase != RunPhase::Running || !current.queue.is_exhausted() {
                    return None;
                }
                let mut next = current.clone();
                next.phase = RunPhase::Completed;
                next.finished_at = Some(Utc::now());
                Some(next)
            }
            WorkflowEvent::FatalError { reason } => {
                if !current.phase.is_in_progress() {
                    return None;
                }
                let mut next = current.clone();
                next.phase = RunPhase::Aborted;
                next.current_job = None;
                next.fatal_reason = Some(reason.clone());
                next.finished_at = Some(Utc::now());
                Some(next)
            }
            WorkflowEvent::Reset => Some(WorkflowState::default())
        }
    }

    /// The notification broadcast to controllers for this event, if any
    pub fn progress(&self) -> Option<ProgressEvent> {
        match self {
            WorkflowEvent::JobStarted { id } => Some(ProgressEvent::JobStarted { id: id.clone() }),
            WorkflowEvent::JobSucceeded { id, .. } => Some(ProgressEvent::JobSucceeded { id: id.clone() }),
            WorkflowEvent::JobFailed { id, reason, .. } => {
                Some(ProgressEvent::JobFailed { id: id.clone(), reason: reason.clone() })
            }
            WorkflowEvent::JobAmbiguous { id, .. } => Some(ProgressEvent::JobAmbiguous { id: id.clone() }),
            WorkflowEvent::WorkflowComplete { outcomes } => {
                Some(ProgressEvent::WorkflowComplete { outcomes: outcomes.clone() })
            }
            WorkflowEvent::FatalError { reason } => Some(ProgressEvent::FatalError { reason: reason.clone() }),
            WorkflowEvent::RunStarted { .. }
            | WorkflowEvent::ReloadStarted
            | WorkflowEvent::ReloadCompleted
            | WorkflowEvent::Reset => None
        }
    }
}

/// Fire-and-forget progress notification for controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProgressEvent {
    JobStarted { id: JobId },
    JobSucceeded { id: JobId },
    JobFailed { id: JobId, reason: FailureReason },
    JobAmbiguous { id: JobId },
    WorkflowComplete { outcomes: Vec<JobOutcome> },
    FatalError { reason: String }
}

impl Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::JobStarted { id } => write!(f, "job-started({})", id),
            ProgressEvent::JobSucceeded { id } => write!(f, "job-succeeded({})", id),
            ProgressEvent::JobFailed { id, reason } => write!(f, "job-failed({}, {})", id, reason),
            ProgressEvent::JobAmbiguous { id } => write!(f, "job-ambiguous({})", id),
            ProgressEvent::WorkflowComplete { outcomes } => write!(f, "workflow-complete({} jobs)", outcomes.len()),
            ProgressEvent::FatalError { reason } => write!(f, "fatal-error({})", reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::transaction::TransactionOutcome;

    fn started(ids: &[&str]) -> WorkflowState {
        let jobs = ids.iter().map(|id| Job::new(*id, json!({}))).collect();
        WorkflowEvent::RunStarted {
            run_id: "run-1".to_string(),
            instance_id: InstanceId::new("tab-1"),
            jobs,
            at: Utc::now()
        }
        .apply(&WorkflowState::default())
        .unwrap()
    }

    fn success() -> TransactionResult {
        TransactionResult::new(TransactionOutcome::Success, "ok")
    }

    #[test]
    fn test_job_events_advance_cursor_in_order() {
        let state = started(&["j1", "j2"]);
        let state = WorkflowEvent::JobStarted { id: JobId::new("j1") }.apply(&state).unwrap();
        assert_eq!(state.current_job, Some(JobId::new("j1")));

        // Out-of-order completion is rejected
        assert!(WorkflowEvent::JobSucceeded { id: JobId::new("j2"), result: success() }.apply(&state).is_none());

        let state = WorkflowEvent::JobSucceeded { id: JobId::new("j1"), result: success() }.apply(&state).unwrap();
        assert_eq!(state.job_index(), 1);
        assert_eq!(state.outcomes.len(), 1);
        assert!(state.current_job.is_none());
    }

    #[test]
    fn test_completion_requires_exhausted_queue() {
        let state = started(&["j1"]);
        let complete = WorkflowEvent::WorkflowComplete { outcomes: vec![] };
        assert!(complete.apply(&state).is_none());

        let state = WorkflowEvent::JobAmbiguous {
            id:     JobId::new("j1"),
            result: TransactionResult::new(TransactionOutcome::Ambiguous, "?")
        }
        .apply(&state)
        .unwrap();
        let state = complete.apply(&state).unwrap();
        assert_eq!(state.phase, RunPhase::Completed);
        assert!(!state.in_progress());
    }

    #[test]
    fn test_run_cannot_start_twice_and_reset_clears() {
        let state = started(&["j1"]);
        let again = WorkflowEvent::RunStarted {
            run_id:      "run-2".to_string(),
            instance_id: InstanceId::new("tab-1"),
            jobs:        vec![Job::new("x", json!({}))],
            at:          Utc::now()
        };
        assert!(again.apply(&state).is_none());

        let state = WorkflowEvent::Reset.apply(&state).unwrap();
        assert_eq!(state, WorkflowState::default());
        assert!(again.apply(&state).is_some());
    }

    #[test]
    fn test_reload_and_fatal_transitions() {
        let state = started(&["j1", "j2"]);
        let reloading = WorkflowEvent::ReloadStarted.apply(&state).unwrap();
        assert_eq!(reloading.phase, RunPhase::Reloading);
        assert!(reloading.in_progress());

        let aborted = WorkflowEvent::FatalError { reason: "reload_timeout".to_string() }.apply(&reloading).unwrap();
        assert_eq!(aborted.phase, RunPhase::Aborted);
        assert_eq!(aborted.fatal_reason.as_deref(), Some("reload_timeout"));

        let resumed = WorkflowEvent::ReloadCompleted.apply(&reloading).unwrap();
        assert_eq!(resumed.phase, RunPhase::Running);
    }

    #[test]
    fn test_progress_notifications_use_kebab_case_tags() {
        let event = WorkflowEvent::JobFailed {
            id:     JobId::new("j1"),
            reason: FailureReason::ReadinessTimeout,
            result: None
        };
        let wire = serde_json::to_value(event.progress().unwrap()).unwrap();
        assert_eq!(wire["type"], "job-failed");
        assert_eq!(wire["id"], "j1");
        assert!(WorkflowEvent::ReloadStarted.progress().is_none());
    }
}
