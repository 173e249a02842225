//! Jobs and the ordered job queue
//!
//! A job is one independent unit of work; its payload is opaque to the orchestrator and
//! is only forwarded to the saga steps.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::domain::error::OrchestratorError;

/// Identifier of a job, unique within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One independent unit of work, immutable once enqueued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id:                JobId,
    /// Opaque business payload forwarded to the saga steps
    #[serde(default)]
    pub payload:           serde_json::Value,
    /// Scope the environment must be switched to before the saga runs
    #[serde(default)]
    pub environment_scope: Option<String>
}

impl Job {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { id: JobId::new(id), payload, environment_scope: None }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.environment_scope = Some(scope.into());
        self
    }
}

/// Parse a job list from YAML (JSON documents are valid YAML too)
pub fn parse_jobs(content: &str) -> Result<Vec<Job>, OrchestratorError> {
    let jobs: Vec<Job> = serde_yaml::from_str(content)?;
    JobQueue::new(jobs.clone())?;
    Ok(jobs)
}

/// Ordered list of jobs plus a cursor pointing at the next job to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobQueue {
    jobs:   Vec<Job>,
    cursor: usize
}

impl JobQueue {
    /// Build a queue, rejecting empty lists and duplicate ids
    pub fn new(jobs: Vec<Job>) -> Result<Self, OrchestratorError> {
        if jobs.is_empty() {
            return Err(OrchestratorError::Validation("job list is empty".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for job in &jobs {
            if !seen.insert(job.id.clone()) {
                return Err(OrchestratorError::Validation(format!("duplicate job id '{}'", job.id)));
            }
        }

        Ok(Self { jobs, cursor: 0 })
    }

    /// Number of jobs in the run, attempted or not
    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The job under the cursor, if any
    pub fn current(&self) -> Option<&Job> {
        self.jobs.get(self.cursor)
    }

    /// Jobs from the cursor onwards (not yet attempted)
    pub fn pending(&self) -> &[Job] {
        &self.jobs[self.cursor.min(self.jobs.len())..]
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.jobs.len()
    }

    /// Return a queue with the cursor moved one job forward
    pub fn advanced(&self) -> Self {
        Self { jobs: self.jobs.clone(), cursor: (self.cursor + 1).min(self.jobs.len()) }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn jobs(ids: &[&str]) -> Vec<Job> {
        ids.iter().map(|id| Job::new(*id, json!({ "term": id }))).collect()
    }

    #[test]
    fn test_queue_rejects_empty_and_duplicates() {
        assert!(matches!(JobQueue::new(vec![]), Err(OrchestratorError::Validation(_))));
        assert!(matches!(JobQueue::new(jobs(&["a", "a"])), Err(OrchestratorError::Validation(_))));
    }

    #[test]
    fn test_queue_cursor_and_remaining() {
        let queue = JobQueue::new(jobs(&["j1", "j2", "j3"])).unwrap();
        assert_eq!(queue.current().unwrap().id.as_str(), "j1");
        assert_eq!(queue.pending().len(), 3);
        assert_eq!(queue.total(), 3);

        let queue = queue.advanced().advanced();
        assert_eq!(queue.current().unwrap().id.as_str(), "j3");
        assert_eq!(queue.cursor(), 2);
        assert_eq!(queue.pending().len(), 1);

        let queue = queue.advanced();
        assert!(queue.is_exhausted());
        assert!(queue.pending().is_empty());
        assert!(queue.advanced().is_exhausted());
    }

    #[test]
    fn test_parse_jobs_file() {
        let yaml = "- id: j1\n  payload:\n    course: 101\n- id: j2\n  environment_scope: fall\n";
        let parsed = parse_jobs(yaml).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].payload, json!({ "course": 101 }));
        assert_eq!(parsed[1].environment_scope.as_deref(), Some("fall"));

        let from_json = parse_jobs(r#"[{"id":"j1"},{"id":"j2"}]"#).unwrap();
        assert_eq!(from_json[1].id, JobId::new("j2"));

        assert!(parse_jobs("- id: j1\n- id: j1\n").is_err());
        assert!(parse_jobs("not: a list").is_err());
    }

    #[test]
    fn test_job_deserializes_with_defaults() {
        let job: Job = serde_json::from_str(r#"{"id":"fall-2024"}"#).unwrap();
        assert_eq!(job.id, JobId::new("fall-2024"));
        assert!(job.payload.is_null());
        assert!(job.environment_scope.is_none());
    }
}
