//! Three-step transaction executor
//!
//! Each job runs Discover, Propose and Commit through the relay bridge. Every step consumes
//! the token returned by the previous one, so a failed step aborts the whole attempt. The
//! executor replays the full saga at most once.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{Level, event};

use crate::{
    domain::{
        constant::{orchestrator, saga},
        envelope::{StepRequest, StepResponse},
        environment::EnvironmentInstance,
        error::OrchestratorError,
        job::Job,
        transaction::{FailureReason, JobStatus, SagaStep, TransactionOutcome, TransactionResult}
    },
    relay::bridge::RelayBridge,
    saga::classify::{MarkerClassifier, Verdict}
};

const FORBIDDEN: u16 = 403;

/// Tunables of the saga
#[derive(Debug, Clone)]
pub struct SagaSettings {
    pub classifier:          MarkerClassifier,
    /// Field of the Discover response holding the continuation token
    pub continuation_field:  String,
    /// Field of the Propose response holding the confirmation token
    pub confirmation_field:  String,
    /// Statuses that indicate the continuation token went stale
    pub stale_statuses:      Vec<u16>,
    /// How long to wait for a scope switch to show up
    pub scope_switch_budget: Duration,
    pub scope_poll_interval: Duration,
    /// Full saga attempts per job, including the first
    pub max_attempts:        u8
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            classifier:          MarkerClassifier::default(),
            continuation_field:  "continuation_token".to_string(),
            confirmation_field:  "confirmation_token".to_string(),
            stale_statuses:      vec![401, 409, 410, 419],
            scope_switch_budget: Duration::from_secs(3),
            scope_poll_interval: Duration::from_millis(250),
            max_attempts:        2
        }
    }
}

/// Final verdict of the saga for one job
#[derive(Debug, Clone, PartialEq)]
pub struct SagaReport {
    pub status: JobStatus,
    pub result: TransactionResult
}

/// Why one attempt stopped before producing a terminal payload
#[derive(Debug, Clone)]
struct StepFailure {
    step:    SagaStep,
    detail:  String,
    network: bool,
    stale:   bool
}

impl StepFailure {
    fn from_error(step: SagaStep, error: OrchestratorError) -> Self {
        let network = matches!(
            error,
            OrchestratorError::RelayTimeout(_) | OrchestratorError::Relay(_) | OrchestratorError::RelayBusy(_)
        );
        Self { step, detail: error.to_string(), network, stale: false }
    }

    fn into_report(self, attempts: u8) -> SagaReport {
        let (outcome, reason) = if self.network {
            (TransactionOutcome::NetworkError, FailureReason::NetworkError(self.detail.clone()))
        } else {
            (TransactionOutcome::Failure, FailureReason::StepFailed { step: self.step, detail: self.detail.clone() })
        };
        SagaReport {
            status: JobStatus::Failed { reason },
            result: TransactionResult::new(outcome, self.detail).with_attempts(attempts)
        }
    }
}

pub struct TransactionExecutor {
    settings: SagaSettings
}

impl TransactionExecutor {
    pub fn new(settings: SagaSettings) -> Self {
        Self { settings }
    }

    /// Run the saga for `job`, replaying it once on an ambiguous outcome or a step failure
    ///
    /// An explicit failure marker is final and never replayed.
    pub async fn run(&self, bridge: &RelayBridge, instance: &mut EnvironmentInstance, job: &Job) -> SagaReport {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            event!(Level::DEBUG, event = saga::ATTEMPT_STARTED, job_id = %job.id, attempt = %attempt);
            let outcome = self.execute_attempt(bridge, instance, job).await;
            let last = attempt >= max_attempts;

            let report = match outcome {
                Ok((verdict, body)) => {
                    let result = TransactionResult::new(verdict.into(), body).with_attempts(attempt);
                    event!(Level::DEBUG, event = saga::ATTEMPT_FINISHED, job_id = %job.id, attempt = %attempt,
                           outcome = %result.outcome);
                    match verdict {
                        Verdict::Success => {
                            return SagaReport { status: JobStatus::Succeeded, result };
                        }
                        Verdict::Failure => {
                            let reason = FailureReason::Rejected(result.diagnostic.clone());
                            return SagaReport { status: JobStatus::Failed { reason }, result };
                        }
                        Verdict::Ambiguous => SagaReport { status: JobStatus::Ambiguous, result }
                    }
                }
                Err(failure) => {
                    event!(Level::WARN, event = saga::STEP_FAILED, job_id = %job.id, attempt = %attempt,
                           step = %failure.step, network = %failure.network, stale = %failure.stale,
                           detail = %failure.detail);
                    failure.into_report(attempt)
                }
            };

            if last {
                return report;
            }

            event!(Level::INFO, event = orchestrator::JOB_RETRYING, job_id = %job.id, attempt = %attempt,
                   status = %report.status);
            attempt += 1;
        }
    }

    /// One full Discover, Propose, Commit pass
    async fn execute_attempt(
        &self,
        bridge: &RelayBridge,
        instance: &mut EnvironmentInstance,
        job: &Job
    ) -> Result<(Verdict, String), StepFailure> {
        if let Some(scope) = &job.environment_scope {
            self.ensure_scope(bridge, instance, scope).await;
        }

        let credential = match bridge.request_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                event!(Level::WARN, event = saga::CREDENTIAL_MISSING, job_id = %job.id);
                return Err(StepFailure {
                    step:    SagaStep::Discover,
                    detail:  "no ambient credential in the environment".to_string(),
                    network: true,
                    stale:   false
                });
            }
            Err(e) => return Err(StepFailure::from_error(SagaStep::Discover, e))
        };

        let discover_body = json!({
            "job_id": job.id,
            "scope": job.environment_scope.as_deref().or(instance.active_scope()),
            "payload": job.payload
        });
        let discovered = self.send(bridge, SagaStep::Discover, &credential, discover_body).await?;
        let continuation = self.extract_token(SagaStep::Discover, &discovered, &self.settings.continuation_field)?;

        let mut propose_body = json!({ "job_id": job.id, "payload": job.payload });
        propose_body[self.settings.continuation_field.as_str()] = Value::String(continuation);
        let proposed = self.send(bridge, SagaStep::Propose, &credential, propose_body).await?;
        let confirmation = self.extract_token(SagaStep::Propose, &proposed, &self.settings.confirmation_field)?;

        let mut commit_body = json!({ "job_id": job.id });
        commit_body[self.settings.confirmation_field.as_str()] = Value::String(confirmation);
        let committed = self.commit(bridge, &credential, commit_body).await?;

        let verdict = self.settings.classifier.classify(&committed.body);
        Ok((verdict, committed.body))
    }

    /// Commit, resending once when the first answer is forbidden
    async fn commit(&self, bridge: &RelayBridge, credential: &str, body: Value) -> Result<StepResponse, StepFailure> {
        let response = self.call(bridge, SagaStep::Commit, credential, body.clone()).await?;
        if response.status != FORBIDDEN {
            return self.check_status(SagaStep::Commit, response);
        }

        event!(Level::INFO, event = saga::COMMIT_RETRY, status = %response.status);
        let response = self.call(bridge, SagaStep::Commit, credential, body).await?;
        self.check_status(SagaStep::Commit, response)
    }

    async fn send(
        &self,
        bridge: &RelayBridge,
        step: SagaStep,
        credential: &str,
        body: Value
    ) -> Result<StepResponse, StepFailure> {
        let response = self.call(bridge, step, credential, body).await?;
        self.check_status(step, response)
    }

    async fn call(
        &self,
        bridge: &RelayBridge,
        step: SagaStep,
        credential: &str,
        body: Value
    ) -> Result<StepResponse, StepFailure> {
        event!(Level::DEBUG, event = saga::STEP_SENT, step = %step);
        let request = StepRequest { step, credential: Some(credential.to_string()), body };
        bridge.send_step(&request).await.map_err(|e| StepFailure::from_error(step, e))
    }

    fn check_status(&self, step: SagaStep, response: StepResponse) -> Result<StepResponse, StepFailure> {
        if response.is_success() {
            return Ok(response);
        }
        Err(StepFailure {
            step,
            detail: format!("HTTP {}: {}", response.status, response.body),
            network: false,
            stale: step != SagaStep::Discover && self.settings.stale_statuses.contains(&response.status)
        })
    }

    fn extract_token(&self, step: SagaStep, response: &StepResponse, field: &str) -> Result<String, StepFailure> {
        let malformed = |detail: String| StepFailure { step, detail, network: false, stale: false };

        let body: Value =
            serde_json::from_str(&response.body).map_err(|e| malformed(format!("malformed body: {}", e)))?;
        body.get(field)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| malformed(format!("malformed body: missing '{}'", field)))
    }

    /// Best-effort scope switch; an unconfirmed switch is only a warning
    async fn ensure_scope(&self, bridge: &RelayBridge, instance: &mut EnvironmentInstance, scope: &str) {
        if instance.active_scope().is_none()
            && let Ok(active) = bridge.active_scope().await
        {
            instance.set_active_scope(active);
        }
        if instance.active_scope() == Some(scope) {
            return;
        }

        event!(Level::INFO, event = saga::SCOPE_SWITCH_REQUESTED, instance = %instance.id(), scope = %scope,
               from = ?instance.active_scope());
        if let Err(e) = bridge.switch_scope(scope).await {
            event!(Level::WARN, event = saga::SCOPE_SWITCH_UNCONFIRMED, scope = %scope, error = %e);
            return;
        }

        let deadline = Instant::now() + self.settings.scope_switch_budget;
        loop {
            if let Ok(active) = bridge.active_scope().await {
                let reflected = active.as_deref() == Some(scope);
                instance.set_active_scope(active);
                if reflected {
                    return;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                event!(Level::WARN, event = saga::SCOPE_SWITCH_UNCONFIRMED, scope = %scope,
                       active = ?instance.active_scope());
                return;
            }
            tokio::time::sleep(self.settings.scope_poll_interval.min(deadline - now)).await;
        }
    }
}
