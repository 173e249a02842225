//! Resumable progress marker persisted between jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{environment::InstanceId, job::Job};

/// Durable record of a run that is between jobs or was interrupted there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Set while the run expects to continue with `remaining_jobs`
    pub resume_flag:             bool,
    /// Jobs not yet attempted, in input order
    pub remaining_jobs:          Vec<Job>,
    /// Instance the run was driving when the checkpoint was written
    pub environment_instance_id: InstanceId,
    /// Run that wrote this checkpoint
    #[serde(default)]
    pub run_id:                  Option<String>,
    /// When the checkpoint was written
    #[serde(default = "Utc::now")]
    pub written_at:              DateTime<Utc>
}

impl Checkpoint {
    pub fn new(remaining_jobs: Vec<Job>, environment_instance_id: InstanceId, run_id: impl Into<String>) -> Self {
        Self {
            resume_flag: true,
            remaining_jobs,
            environment_instance_id,
            run_id: Some(run_id.into()),
            written_at: Utc::now()
        }
    }

    /// A checkpoint can be resumed when it still flags resumption and has work left
    pub fn is_resumable(&self) -> bool {
        self.resume_flag && !self.remaining_jobs.is_empty()
    }
}
