//! Controller-facing handle of the orchestrator actor

use std::sync::Arc;

use ractor::{
    Actor, ActorRef,
    concurrency::JoinHandle,
    rpc::{CallResult, call}
};
use tokio::sync::{broadcast, watch};

use crate::{
    actor::{
        message::{OrchestratorMessage, RunAck},
        orchestrator::{Orchestrator, OrchestratorArgs, OrchestratorDeps}
    },
    domain::{checkpoint::Checkpoint, error::OrchestratorError, event::ProgressEvent, job::Job, state::WorkflowState},
    port::checkpoint::CheckpointStore
};

const PROGRESS_CAPACITY: usize = 256;

/// Handle used by controllers to drive and observe the orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    actor:       ActorRef<OrchestratorMessage>,
    snapshot:    watch::Receiver<WorkflowState>,
    progress:    broadcast::Sender<ProgressEvent>,
    checkpoints: Arc<dyn CheckpointStore>
}

impl OrchestratorHandle {
    /// Spawn the orchestrator actor
    pub async fn spawn(deps: OrchestratorDeps) -> Result<(Self, JoinHandle<()>), OrchestratorError> {
        let (snapshot_tx, snapshot) = watch::channel(WorkflowState::default());
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        let checkpoints = deps.checkpoints.clone();

        let args = OrchestratorArgs { deps, snapshot: snapshot_tx, progress: progress.clone() };
        let (actor, join) = Actor::spawn(None, Orchestrator, args).await?;

        Ok((Self { actor, snapshot, progress, checkpoints }, join))
    }

    /// Start a run; returns once the environment is located and the first checkpoint written
    ///
    /// Fails without side effects when a run is already active or no environment is found.
    pub async fn start(&self, jobs: Vec<Job>) -> Result<RunAck, OrchestratorError> {
        let current = self.status();
        if current.in_progress() {
            return Err(OrchestratorError::RunInProgress(current.run_id.unwrap_or_default()));
        }
        self.call(|reply| OrchestratorMessage::Start { jobs, reply }).await?
    }

    /// Resume the remaining jobs of a persisted checkpoint; `None` when there is nothing to resume
    pub async fn resume(&self) -> Result<Option<RunAck>, OrchestratorError> {
        self.call(|reply| OrchestratorMessage::Resume { reply }).await?
    }

    /// Clear the checkpoint and in-memory state
    ///
    /// A job already executing runs to completion first; the run then stops. The reset is
    /// queued behind that job and the reload after it, so the acknowledgement can take up
    /// to one saga plus the configured reload timeout (30 s by default). Controllers that
    /// need a bound should wrap this call in `tokio::time::timeout`; the reset still
    /// applies after the caller stops waiting.
    pub async fn reset(&self) -> Result<(), OrchestratorError> {
        self.call(|reply| OrchestratorMessage::Reset { reply }).await
    }

    /// Latest state snapshot; never waits on the actor
    pub fn status(&self) -> WorkflowState {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Wait until no run is in progress and return the final snapshot
    pub async fn finished(&self) -> Result<WorkflowState, OrchestratorError> {
        let mut snapshot = self.snapshot.clone();
        let state = snapshot
            .wait_for(|s| !s.in_progress())
            .await
            .map_err(|e| OrchestratorError::Messaging(format!("Orchestrator stopped: {}", e)))?;
        Ok((*state).clone())
    }

    /// Checkpoint left by an interrupted run, if any
    pub async fn pending_checkpoint(&self) -> Result<Option<Checkpoint>, OrchestratorError> {
        Ok(self.checkpoints.load().await?.filter(Checkpoint::is_resumable))
    }

    pub fn shutdown(&self) {
        self.actor.stop(None);
    }

    async fn call<T, F>(&self, build: F) -> Result<T, OrchestratorError>
    where
        T: Send + 'static,
        F: FnOnce(ractor::RpcReplyPort<T>) -> OrchestratorMessage
    {
        match call(&self.actor, build, None).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(OrchestratorError::Timeout("Orchestrator did not answer".to_string())),
            Ok(CallResult::SenderError) => {
                Err(OrchestratorError::Messaging("Orchestrator dropped the reply".to_string()))
            }
            Err(e) => Err(OrchestratorError::Messaging(format!("Failed to reach orchestrator: {}", e)))
        }
    }
}
