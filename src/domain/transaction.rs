//! Saga steps, transaction results and per-job outcomes

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::domain::job::JobId;

/// The three dependent steps of a saga, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    Discover,
    Propose,
    Commit
}

impl Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaStep::Discover => write!(f, "discover"),
            SagaStep::Propose => write!(f, "propose"),
            SagaStep::Commit => write!(f, "commit")
        }
    }
}

/// Terminal classification of a saga
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    Success,
    Failure,
    Ambiguous,
    NetworkError
}

impl Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOutcome::Success => write!(f, "success"),
            TransactionOutcome::Failure => write!(f, "failure"),
            TransactionOutcome::Ambiguous => write!(f, "ambiguous"),
            TransactionOutcome::NetworkError => write!(f, "network_error")
        }
    }
}

/// Classified saga result plus the raw diagnostic payload it was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub outcome:    TransactionOutcome,
    pub diagnostic: String,
    /// Full saga attempts spent on this result (1 or 2)
    #[serde(default = "default_attempts")]
    pub attempts:   u8
}

fn default_attempts() -> u8 {
    1
}

impl TransactionResult {
    pub fn new(outcome: TransactionOutcome, diagnostic: impl Into<String>) -> Self {
        Self { outcome, diagnostic: diagnostic.into(), attempts: 1 }
    }

    pub fn with_attempts(mut self, attempts: u8) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Why a job ended in failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The relay tiers did not become ready within the probe budget
    ReadinessTimeout,
    /// The environment answered with an explicit failure marker
    Rejected(String),
    /// A saga step failed (transport or validation) on the final attempt
    StepFailed { step: SagaStep, detail: String },
    /// The relay or the network did not answer
    NetworkError(String),
    /// The environment did not finish reloading; the run was aborted
    ReloadTimeout,
    /// The checkpoint could not be advanced past a finished job; the run was aborted
    CheckpointWriteFailed,
    /// Any other error caught at the loop boundary
    Internal(String)
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ReadinessTimeout => write!(f, "readiness_timeout"),
            FailureReason::Rejected(detail) => write!(f, "rejected: {}", detail),
            FailureReason::StepFailed { step, detail } => write!(f, "{}_failed: {}", step, detail),
            FailureReason::NetworkError(detail) => write!(f, "network_error: {}", detail),
            FailureReason::ReloadTimeout => write!(f, "reload_timeout"),
            FailureReason::CheckpointWriteFailed => write!(f, "checkpoint_write_failed"),
            FailureReason::Internal(detail) => write!(f, "internal: {}", detail)
        }
    }
}

/// Final status of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed { reason: FailureReason },
    Ambiguous
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed { reason } => write!(f, "failed ({})", reason),
            JobStatus::Ambiguous => write!(f, "ambiguous")
        }
    }
}

/// Recorded outcome of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Saga result when the saga ran at all
    pub result: Option<TransactionResult>
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded)
    }
}

/// Table row for rendering outcomes
#[derive(Debug, Clone, Tabled)]
pub struct JobOutcomeRow {
    #[tabled(rename = "Job")]
    pub job_id:   String,
    #[tabled(rename = "Status")]
    pub status:   String,
    #[tabled(rename = "Attempts")]
    pub attempts: String
}

impl From<&JobOutcome> for JobOutcomeRow {
    fn from(outcome: &JobOutcome) -> Self {
        Self {
            job_id:   outcome.job_id.to_string(),
            status:   outcome.status.to_string(),
            attempts: outcome.result.as_ref().map(|r| r.attempts.to_string()).unwrap_or_else(|| "-".to_string())
        }
    }
}
