//! Orchestrator Actor - drives one run at a time through the job queue
//!
//! Each job is processed by a `RunNextJob` message the actor sends to itself once the
//! previous job and the reload after it are done. Controller messages queued in the
//! meantime (reset, a second start) are therefore handled between two jobs, never in the
//! middle of a saga.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::{
    sync::{broadcast, watch},
    time::Instant
};
use tracing::{Level, event};
use uuid::Uuid;

use crate::{
    actor::message::{OrchestratorMessage, RunAck},
    domain::{
        checkpoint::Checkpoint,
        constant::{checkpoint, orchestrator},
        environment::{EnvironmentInstance, InstanceId, InstanceLifecycle, InstanceMatcher},
        error::OrchestratorError,
        event::{ProgressEvent, WorkflowEvent},
        job::{Job, JobQueue},
        state::WorkflowState,
        transaction::{FailureReason, JobStatus, TransactionOutcome, TransactionResult}
    },
    locator::EnvironmentLocator,
    port::{checkpoint::CheckpointStore, environment::EnvironmentHost},
    relay::{
        bridge::RelayBridge,
        probe::{ProbeSettings, ReadinessProbe}
    },
    saga::executor::{SagaSettings, TransactionExecutor}
};

/// Everything the orchestrator needs from its embedder
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub host:            Arc<dyn EnvironmentHost>,
    pub checkpoints:     Arc<dyn CheckpointStore>,
    /// Predicate selecting the target environment
    pub matcher:         InstanceMatcher,
    pub probe:           ProbeSettings,
    pub saga:            SagaSettings,
    /// Timeout of one cross-tier request
    pub request_timeout: Duration,
    /// Time allowed for the environment to come back after a reload
    pub reload_timeout:  Duration
}

/// Spawn arguments of the actor
pub struct OrchestratorArgs {
    pub deps:     OrchestratorDeps,
    pub snapshot: watch::Sender<WorkflowState>,
    pub progress: broadcast::Sender<ProgressEvent>
}

/// The run currently being driven
struct ActiveRun {
    generation: u64,
    run_id:     String,
    instance:   EnvironmentInstance,
    bridge:     RelayBridge
}

/// Orchestrator Actor State
pub struct OrchestratorState {
    deps:       OrchestratorDeps,
    locator:    EnvironmentLocator,
    probe:      ReadinessProbe,
    executor:   TransactionExecutor,
    snapshot:   watch::Sender<WorkflowState>,
    progress:   broadcast::Sender<ProgressEvent>,
    run:        Option<ActiveRun>,
    /// Bumped by every start and reset; `RunNextJob` messages of older runs are ignored
    generation: u64
}

impl OrchestratorState {
    fn current(&self) -> WorkflowState {
        self.snapshot.borrow().clone()
    }

    /// Apply `event` to the published state and notify controllers
    fn emit(&self, event: WorkflowEvent) -> bool {
        let current = self.current();
        let Some(next) = event.apply(&current) else {
            event!(Level::WARN, event = orchestrator::EVENT_REJECTED, kind = %event, phase = ?current.phase);
            return false;
        };

        // Notify before publishing so a controller that saw the final snapshot has every event
        if let Some(progress) = event.progress()
            && self.progress.send(progress).is_err()
        {
            event!(Level::TRACE, event = orchestrator::NOTIFICATION_DROPPED, kind = %event);
        }
        self.snapshot.send_replace(next);
        true
    }

    async fn save_checkpoint(&self, remaining: &[Job]) -> Result<(), OrchestratorError> {
        let Some(run) = &self.run else { return Ok(()) };
        let checkpoint = Checkpoint::new(remaining.to_vec(), run.instance.id().clone(), run.run_id.clone());
        match self.deps.checkpoints.save(&checkpoint).await {
            Ok(()) => {
                event!(Level::DEBUG, event = checkpoint::CHECKPOINT_WRITTEN, run_id = %run.run_id,
                       remaining = %remaining.len());
                Ok(())
            }
            Err(e) => {
                event!(Level::ERROR, event = checkpoint::CHECKPOINT_FAILED, run_id = %run.run_id, error = %e);
                Err(e)
            }
        }
    }

    async fn clear_checkpoint(&self) {
        match self.deps.checkpoints.clear().await {
            Ok(()) => event!(Level::DEBUG, event = checkpoint::CHECKPOINT_CLEARED),
            Err(e) => event!(Level::ERROR, event = checkpoint::CHECKPOINT_FAILED, error = %e)
        }
    }
}

/// Orchestrator Actor
pub struct Orchestrator;

#[async_trait::async_trait]
impl Actor for Orchestrator {
    type Arguments = OrchestratorArgs;
    type Msg = OrchestratorMessage;
    type State = OrchestratorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        event!(Level::DEBUG, event = orchestrator::ORCHESTRATOR_STARTED);

        let OrchestratorArgs { deps, snapshot, progress } = args;
        Ok(OrchestratorState {
            locator: EnvironmentLocator::new(deps.host.clone()),
            probe: ReadinessProbe::new(deps.host.clone(), deps.probe),
            executor: TransactionExecutor::new(deps.saga.clone()),
            deps,
            snapshot,
            progress,
            run: None,
            generation: 0
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        match message {
            OrchestratorMessage::Start { jobs, reply } => {
                let result = self.handle_start(&myself, jobs, state).await;
                respond(reply, result);
            }
            OrchestratorMessage::Resume { reply } => {
                let result = self.handle_resume(&myself, state).await;
                respond(reply, result);
            }
            OrchestratorMessage::RunNextJob { generation } => {
                if state.run.as_ref().map(|r| r.generation) != Some(generation) {
                    event!(Level::DEBUG, event = orchestrator::RUN_STALE, generation = %generation,
                           current = %state.generation);
                    return Ok(());
                }
                self.run_next_job(&myself, state).await;
            }
            OrchestratorMessage::Reset { reply } => {
                self.handle_reset(state).await;
                respond(reply, ());
            }
        }
        Ok(())
    }
}

fn respond<T: Send + 'static>(reply: RpcReplyPort<T>, value: T) {
    if reply.send(value).is_err() {
        event!(Level::DEBUG, event = orchestrator::NOTIFICATION_DROPPED, message = "reply_receiver_gone");
    }
}

/// Await `work` until the shared reload deadline
async fn within<T>(
    deadline: Instant,
    timeout: Duration,
    work: impl Future<Output = Result<T, OrchestratorError>>
) -> Result<T, OrchestratorError> {
    tokio::time::timeout_at(deadline, work)
        .await
        .map_err(|_| OrchestratorError::Timeout(format!("environment did not reload within {} ms", timeout.as_millis())))?
}

impl Orchestrator {
    async fn handle_start(
        &self,
        myself: &ActorRef<OrchestratorMessage>,
        jobs: Vec<Job>,
        state: &mut OrchestratorState
    ) -> Result<RunAck, OrchestratorError> {
        event!(Level::INFO, event = orchestrator::RUN_REQUESTED, jobs = %jobs.len());
        self.ensure_idle(state)?;
        JobQueue::new(jobs.clone())?;

        let instance = state.locator.locate(&state.deps.matcher).await?;
        self.begin_run(myself, state, jobs, instance).await
    }

    async fn handle_resume(
        &self,
        myself: &ActorRef<OrchestratorMessage>,
        state: &mut OrchestratorState
    ) -> Result<Option<RunAck>, OrchestratorError> {
        self.ensure_idle(state)?;

        let Some(checkpoint) = state.deps.checkpoints.load().await? else {
            return Ok(None);
        };
        event!(Level::DEBUG, event = checkpoint::CHECKPOINT_LOADED, instance = %checkpoint.environment_instance_id,
               remaining = %checkpoint.remaining_jobs.len());
        if !checkpoint.is_resumable() {
            state.clear_checkpoint().await;
            return Ok(None);
        }

        // Prefer the instance the interrupted run was driving
        let preferred = state.deps.matcher.clone().with_instance_id(checkpoint.environment_instance_id.clone());
        let instance = match state.locator.locate(&preferred).await {
            Ok(instance) => instance,
            Err(_) => state.locator.locate(&state.deps.matcher).await?
        };

        event!(Level::INFO, event = orchestrator::RUN_RESUMED, previous_run = ?checkpoint.run_id,
               instance = %instance.id(), remaining = %checkpoint.remaining_jobs.len());
        self.begin_run(myself, state, checkpoint.remaining_jobs, instance).await.map(Some)
    }

    fn ensure_idle(&self, state: &OrchestratorState) -> Result<(), OrchestratorError> {
        let current = state.current();
        if current.in_progress() {
            let run_id = current.run_id.unwrap_or_default();
            event!(Level::WARN, event = orchestrator::RUN_REJECTED, active_run = %run_id);
            return Err(OrchestratorError::RunInProgress(run_id));
        }
        Ok(())
    }

    /// Write the initial checkpoint, publish the new run and schedule its first job
    async fn begin_run(
        &self,
        myself: &ActorRef<OrchestratorMessage>,
        state: &mut OrchestratorState,
        jobs: Vec<Job>,
        mut instance: EnvironmentInstance
    ) -> Result<RunAck, OrchestratorError> {
        instance.transition(InstanceLifecycle::Ready)?;
        let bridge = RelayBridge::connect(state.deps.host.as_ref(), instance.id(), state.deps.request_timeout)?;

        let run_id = Uuid::new_v4().to_string();
        let checkpoint = Checkpoint::new(jobs.clone(), instance.id().clone(), run_id.clone());
        state.deps.checkpoints.save(&checkpoint).await?;

        state.generation += 1;
        let ack = RunAck { run_id: run_id.clone(), instance_id: instance.id().clone(), jobs: jobs.len() };
        state.emit(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
            instance_id: instance.id().clone(),
            jobs,
            at: Utc::now()
        });
        state.run = Some(ActiveRun { generation: state.generation, run_id, instance, bridge });

        event!(Level::INFO, event = orchestrator::RUN_STARTED, run_id = %ack.run_id, instance = %ack.instance_id,
               jobs = %ack.jobs);
        self.schedule_next(myself, state.generation);
        Ok(ack)
    }

    fn schedule_next(&self, myself: &ActorRef<OrchestratorMessage>, generation: u64) {
        if let Err(e) = myself.cast(OrchestratorMessage::RunNextJob { generation }) {
            event!(Level::ERROR, event = orchestrator::RUN_ABORTED, error = %e, message = "failed_to_schedule_job");
        }
    }

    async fn handle_reset(&self, state: &mut OrchestratorState) {
        state.generation += 1;
        state.run = None;
        state.clear_checkpoint().await;
        state.emit(WorkflowEvent::Reset);
        event!(Level::INFO, event = orchestrator::STATE_RESET, generation = %state.generation);
    }

    /// Process the job under the cursor, then reload or finish
    async fn run_next_job(&self, myself: &ActorRef<OrchestratorMessage>, state: &mut OrchestratorState) {
        let snapshot = state.current();
        let Some(job) = snapshot.queue.current().cloned() else {
            self.complete(state).await;
            return;
        };

        event!(Level::INFO, event = orchestrator::JOB_STARTED, job_id = %job.id, index = %snapshot.job_index(),
               total = %snapshot.total_jobs());
        state.emit(WorkflowEvent::JobStarted { id: job.id.clone() });

        let (status, result) = self.execute_job(state, &job).await;
        event!(Level::INFO, event = orchestrator::JOB_FINISHED, job_id = %job.id, status = %status);
        let recorded = match status {
            JobStatus::Succeeded => match result {
                Some(result) => WorkflowEvent::JobSucceeded { id: job.id.clone(), result },
                None => WorkflowEvent::JobFailed {
                    id:     job.id.clone(),
                    reason: FailureReason::Internal("success without a result".to_string()),
                    result: None
                }
            },
            JobStatus::Ambiguous => WorkflowEvent::JobAmbiguous {
                id:     job.id.clone(),
                result: result.unwrap_or_else(|| TransactionResult::new(TransactionOutcome::Ambiguous, ""))
            },
            JobStatus::Failed { reason } => WorkflowEvent::JobFailed { id: job.id.clone(), reason, result }
        };
        state.emit(recorded);

        let snapshot = state.current();
        if snapshot.queue.is_exhausted() {
            self.complete(state).await;
        } else {
            self.reload(myself, state, snapshot.queue.pending()).await;
        }
    }

    /// Readiness handshake then saga; every failure becomes a recorded status
    async fn execute_job(&self, state: &mut OrchestratorState, job: &Job) -> (JobStatus, Option<TransactionResult>) {
        let Some(run) = state.run.as_mut() else {
            return (JobStatus::Failed { reason: FailureReason::Internal("no active run".to_string()) }, None);
        };

        if state.probe.ensure_ready(&run.bridge).await.is_err() {
            return (JobStatus::Failed { reason: FailureReason::ReadinessTimeout }, None);
        }

        if let Err(e) = run.instance.transition(InstanceLifecycle::Executing) {
            return (JobStatus::Failed { reason: FailureReason::Internal(e.to_string()) }, None);
        }
        let report = state.executor.run(&run.bridge, &mut run.instance, job).await;
        (report.status, Some(report.result))
    }

    /// Checkpoint the remaining jobs, reload the environment and schedule the next job
    ///
    /// A checkpoint that cannot be advanced ends the run before the reload.
    async fn reload(&self, myself: &ActorRef<OrchestratorMessage>, state: &mut OrchestratorState, remaining: &[Job]) {
        if state.save_checkpoint(remaining).await.is_err() {
            // the stored checkpoint still lists the job that just ran
            state.clear_checkpoint().await;
            self.abort(state, FailureReason::CheckpointWriteFailed).await;
            return;
        }
        state.emit(WorkflowEvent::ReloadStarted);

        let Some(run) = state.run.as_mut() else { return };
        let instance_id = run.instance.id().clone();
        run.bridge.invalidate();
        if let Err(e) = run.instance.transition(InstanceLifecycle::Reloading) {
            event!(Level::WARN, event = orchestrator::RELOAD_STARTED, instance = %instance_id, error = %e);
        }
        event!(Level::INFO, event = orchestrator::RELOAD_STARTED, instance = %instance_id);

        let host = state.deps.host.clone();
        let timeout = state.deps.reload_timeout;
        let deadline = Instant::now() + timeout;

        if let Err(e) = within(deadline, timeout, host.reload(&instance_id)).await {
            self.reload_failed(state, &instance_id, e).await;
            return;
        }
        if let Some(run) = state.run.as_mut()
            && let Err(e) = run.instance.transition(InstanceLifecycle::Loading)
        {
            event!(Level::WARN, event = orchestrator::RELOAD_STARTED, instance = %instance_id, error = %e);
        }

        let descriptor = match within(deadline, timeout, host.wait_reloaded(&instance_id)).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.reload_failed(state, &instance_id, e).await;
                return;
            }
        };

        let Some(run) = state.run.as_mut() else { return };
        let scope = run.instance.active_scope().map(str::to_string);
        run.instance.descriptor = descriptor;
        if run.instance.descriptor.active_scope.is_none() {
            run.instance.set_active_scope(scope);
        }
        if let Err(e) = run.instance.transition(InstanceLifecycle::Ready) {
            event!(Level::WARN, event = orchestrator::RELOAD_COMPLETED, instance = %instance_id, error = %e);
        }

        match RelayBridge::connect(state.deps.host.as_ref(), &instance_id, state.deps.request_timeout) {
            Ok(bridge) => run.bridge = bridge,
            Err(e) => {
                self.reload_failed(state, &instance_id, e).await;
                return;
            }
        }

        let generation = run.generation;
        event!(Level::INFO, event = orchestrator::RELOAD_COMPLETED, instance = %instance_id);
        state.emit(WorkflowEvent::ReloadCompleted);
        self.schedule_next(myself, generation);
    }

    async fn reload_failed(&self, state: &mut OrchestratorState, instance_id: &InstanceId, error: OrchestratorError) {
        event!(Level::ERROR, event = orchestrator::RELOAD_TIMED_OUT, instance = %instance_id, error = %error);
        self.abort(state, FailureReason::ReloadTimeout).await;
    }

    /// Fail every job not yet attempted and stop the run
    ///
    /// After a reload failure the checkpoint is kept so the remainder can be resumed.
    async fn abort(&self, state: &mut OrchestratorState, reason: FailureReason) {
        if let Some(run) = state.run.as_mut()
            && matches!(run.instance.lifecycle(), InstanceLifecycle::Reloading | InstanceLifecycle::Loading)
            && let Err(e) = run.instance.transition(InstanceLifecycle::Gone)
        {
            event!(Level::WARN, event = orchestrator::RUN_ABORTED, error = %e);
        }

        let pending: Vec<Job> = state.current().queue.pending().to_vec();
        for job in &pending {
            state.emit(WorkflowEvent::JobFailed { id: job.id.clone(), reason: reason.clone(), result: None });
        }
        state.emit(WorkflowEvent::FatalError { reason: reason.to_string() });
        event!(Level::ERROR, event = orchestrator::RUN_ABORTED, reason = %reason, abandoned = %pending.len());
        state.run = None;
    }

    async fn complete(&self, state: &mut OrchestratorState) {
        state.clear_checkpoint().await;
        if let Some(run) = state.run.as_mut()
            && let Err(e) = run.instance.transition(InstanceLifecycle::Ready)
        {
            event!(Level::WARN, event = orchestrator::RUN_COMPLETED, error = %e);
        }

        let outcomes = state.current().outcomes;
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        state.emit(WorkflowEvent::WorkflowComplete { outcomes: outcomes.clone() });
        event!(Level::INFO, event = orchestrator::RUN_COMPLETED, jobs = %outcomes.len(), succeeded = %succeeded);
        state.run = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::{
        actor::handle::OrchestratorHandle,
        adapter::{
            simulator::{ScriptedBackend, SimulatedHost, SimulatorSettings, testing::*},
            storage::InMemoryCheckpointStore
        },
        domain::{
            envelope::StepResponse, job::JobId, state::RunPhase, transaction::SagaStep
        }
    };

    /// Checkpoint store that remembers the remaining job ids of every save
    #[derive(Default)]
    struct RecordingStore {
        inner:        InMemoryCheckpointStore,
        saves:        Mutex<Vec<Vec<String>>>,
        /// 1-based number of the save that fails
        failing_save: Option<usize>
    }

    impl RecordingStore {
        fn failing_on_save(n: usize) -> Self {
            Self { failing_save: Some(n), ..Self::default() }
        }

        fn saves(&self) -> Vec<Vec<String>> {
            self.saves.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CheckpointStore for RecordingStore {
        async fn load(&self) -> Result<Option<Checkpoint>, OrchestratorError> {
            self.inner.load().await
        }

        async fn save(&self, checkpoint: &Checkpoint) -> Result<(), OrchestratorError> {
            let ids = checkpoint.remaining_jobs.iter().map(|j| j.id.to_string()).collect();
            let count = {
                let mut saves = self.saves.lock().unwrap();
                saves.push(ids);
                saves.len()
            };
            if self.failing_save == Some(count) {
                return Err(OrchestratorError::Storage("disk full".to_string()));
            }
            self.inner.save(checkpoint).await
        }

        async fn clear(&self) -> Result<(), OrchestratorError> {
            self.inner.clear().await
        }
    }

    struct Harness {
        handle:  OrchestratorHandle,
        host:    Arc<SimulatedHost>,
        backend: Arc<ScriptedBackend>,
        store:   Arc<RecordingStore>
    }

    fn deps(host: Arc<SimulatedHost>, store: Arc<RecordingStore>) -> OrchestratorDeps {
        OrchestratorDeps {
            host,
            checkpoints: store,
            matcher: InstanceMatcher::url_prefix("https://console.example/"),
            probe: ProbeSettings {
                budget:        Duration::from_millis(800),
                poll_interval: Duration::from_millis(20),
                ping_timeout:  Duration::from_millis(200)
            },
            saga: SagaSettings::default(),
            request_timeout: Duration::from_secs(1),
            reload_timeout: Duration::from_millis(500)
        }
    }

    async fn harness_with(backend: ScriptedBackend, settings: SimulatorSettings) -> Harness {
        harness_on(backend, settings, RecordingStore::default()).await
    }

    async fn harness_on(backend: ScriptedBackend, settings: SimulatorSettings, store: RecordingStore) -> Harness {
        let backend = Arc::new(backend);
        let host = host_with(backend.clone(), settings);
        let store = Arc::new(store);
        let (handle, _) = OrchestratorHandle::spawn(deps(host.clone(), store.clone())).await.unwrap();
        Harness { handle, host, backend, store }
    }

    async fn harness(backend: ScriptedBackend) -> Harness {
        harness_with(backend, fast_settings()).await
    }

    fn jobs(ids: &[&str]) -> Vec<Job> {
        ids.iter().map(|id| Job::new(*id, json!({ "ref": id }))).collect()
    }

    fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn id(id: &str) -> JobId {
        JobId::new(id)
    }

    #[tokio::test]
    async fn test_two_successful_jobs_reload_between_them() {
        let h = harness(ScriptedBackend::new()).await;
        let mut rx = h.handle.subscribe();

        let ack = h.handle.start(jobs(&["J1", "J2"])).await.unwrap();
        assert_eq!(ack.instance_id, InstanceId::new("tab-1"));
        assert_eq!(ack.jobs, 2);

        let state = h.handle.finished().await.unwrap();
        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(state.succeeded(), 2);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], ProgressEvent::JobStarted { id: id("J1") });
        assert_eq!(events[1], ProgressEvent::JobSucceeded { id: id("J1") });
        assert_eq!(events[2], ProgressEvent::JobStarted { id: id("J2") });
        assert_eq!(events[3], ProgressEvent::JobSucceeded { id: id("J2") });
        assert!(matches!(&events[4], ProgressEvent::WorkflowComplete { outcomes } if outcomes.len() == 2));

        assert_eq!(h.host.reloads(), 1);
        assert!(h.handle.pending_checkpoint().await.unwrap().is_none());
        assert!(h.store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ambiguous_commit_is_retried_once_then_succeeds() {
        let backend = ScriptedBackend::new();
        backend.script(SagaStep::Commit, StepResponse::new(200, r#"{"status":"PENDING"}"#));
        let h = harness(backend).await;
        let mut rx = h.handle.subscribe();

        h.handle.start(jobs(&["J1"])).await.unwrap();
        let state = h.handle.finished().await.unwrap();

        assert_eq!(h.backend.calls().len(), 6);
        assert_eq!(state.outcomes[0].result.as_ref().map(|r| r.attempts), Some(2));
        let events = drain(&mut rx);
        assert_eq!(events[1], ProgressEvent::JobSucceeded { id: id("J1") });
        assert_eq!(h.host.reloads(), 0);
    }

    #[tokio::test]
    async fn test_failed_relay_install_fails_only_that_job() {
        let h = harness(ScriptedBackend::new()).await;
        h.host.fail_next_installs(2);
        let mut rx = h.handle.subscribe();

        h.handle.start(jobs(&["J1", "J2"])).await.unwrap();
        let state = h.handle.finished().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events[1], ProgressEvent::JobFailed { id: id("J1"), reason: FailureReason::ReadinessTimeout });
        assert_eq!(events[2], ProgressEvent::JobStarted { id: id("J2") });
        assert_eq!(events[3], ProgressEvent::JobSucceeded { id: id("J2") });
        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(h.host.reloads(), 1);
        assert_eq!(h.backend.calls_of(SagaStep::Discover), 1);
    }

    #[tokio::test]
    async fn test_no_environment_fails_start_without_side_effects() {
        let backend = Arc::new(ScriptedBackend::new());
        let host = Arc::new(SimulatedHost::new(
            backend,
            Arc::new(crate::adapter::credential::FallbackCredentialSource::new()),
            fast_settings()
        ));
        host.add_instance(descriptor("tab-9", "https://unrelated.example/"));
        let store = Arc::new(RecordingStore::default());
        let (handle, _) = OrchestratorHandle::spawn(deps(host, store.clone())).await.unwrap();
        let mut rx = handle.subscribe();

        let result = handle.start(jobs(&["J1"])).await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(store.saves().is_empty());
        assert_eq!(handle.status().phase, RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_jobs_complete_in_input_order_with_shrinking_checkpoints() {
        let h = harness(ScriptedBackend::new()).await;
        let mut rx = h.handle.subscribe();

        h.handle.start(jobs(&["J1", "J2", "J3", "J4"])).await.unwrap();
        h.handle.finished().await.unwrap();

        let succeeded: Vec<JobId> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::JobSucceeded { id } => Some(id),
                _ => None
            })
            .collect();
        assert_eq!(succeeded, vec![id("J1"), id("J2"), id("J3"), id("J4")]);

        assert_eq!(h.store.saves(), vec![
            vec!["J1", "J2", "J3", "J4"],
            vec!["J2", "J3", "J4"],
            vec!["J3", "J4"],
            vec!["J4"]
        ]);
        assert!(h.store.load().await.unwrap().is_none());
        assert_eq!(h.host.reloads(), 3);
    }

    #[tokio::test]
    async fn test_reload_timeout_aborts_remaining_jobs() {
        let settings = SimulatorSettings { hang_reloads: true, ..fast_settings() };
        let h = harness_with(ScriptedBackend::new(), settings).await;
        let mut rx = h.handle.subscribe();

        h.handle.start(jobs(&["J1", "J2", "J3"])).await.unwrap();
        let state = h.handle.finished().await.unwrap();

        assert_eq!(state.phase, RunPhase::Aborted);
        assert_eq!(state.outcomes.len(), 3);
        let events = drain(&mut rx);
        assert_eq!(events[1], ProgressEvent::JobSucceeded { id: id("J1") });
        assert_eq!(events[2], ProgressEvent::JobFailed { id: id("J2"), reason: FailureReason::ReloadTimeout });
        assert_eq!(events[3], ProgressEvent::JobFailed { id: id("J3"), reason: FailureReason::ReloadTimeout });
        assert_eq!(events[4], ProgressEvent::FatalError { reason: "reload_timeout".to_string() });

        let checkpoint = h.handle.pending_checkpoint().await.unwrap().unwrap();
        let remaining: Vec<_> = checkpoint.remaining_jobs.iter().map(|j| j.id.to_string()).collect();
        assert_eq!(remaining, vec!["J2", "J3"]);
    }

    #[tokio::test]
    async fn test_checkpoint_write_failure_aborts_before_reload() {
        // save 1 is the initial checkpoint, save 2 the one after J1
        let h = harness_on(ScriptedBackend::new(), fast_settings(), RecordingStore::failing_on_save(2)).await;
        let mut rx = h.handle.subscribe();

        h.handle.start(jobs(&["J1", "J2", "J3"])).await.unwrap();
        let state = h.handle.finished().await.unwrap();

        assert_eq!(state.phase, RunPhase::Aborted);
        assert_eq!(state.fatal_reason.as_deref(), Some("checkpoint_write_failed"));
        assert_eq!(h.host.reloads(), 0);
        assert_eq!(h.backend.calls_of(SagaStep::Discover), 1);

        let events = drain(&mut rx);
        assert_eq!(events[1], ProgressEvent::JobSucceeded { id: id("J1") });
        assert_eq!(events[2], ProgressEvent::JobFailed { id: id("J2"), reason: FailureReason::CheckpointWriteFailed });
        assert_eq!(events[3], ProgressEvent::JobFailed { id: id("J3"), reason: FailureReason::CheckpointWriteFailed });
        assert_eq!(events[4], ProgressEvent::FatalError { reason: "checkpoint_write_failed".to_string() });

        // the committed job is never offered for resume
        assert!(h.handle.pending_checkpoint().await.unwrap().is_none());
        assert!(h.handle.resume().await.unwrap().is_none());
        assert_eq!(h.backend.calls_of(SagaStep::Discover), 1);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let h = harness(ScriptedBackend::new().with_latency(Duration::from_millis(50))).await;

        h.handle.start(jobs(&["J1", "J2"])).await.unwrap();
        let second = h.handle.start(jobs(&["J3"])).await;
        assert!(matches!(second, Err(OrchestratorError::RunInProgress(_))));

        let state = h.handle.finished().await.unwrap();
        assert_eq!(state.total_jobs(), 2);
        assert_eq!(state.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_empty_job_list_is_invalid() {
        let h = harness(ScriptedBackend::new()).await;
        let result = h.handle.start(Vec::new()).await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
        assert!(h.store.saves().is_empty());
    }

    #[tokio::test]
    async fn test_reset_stops_run_after_current_job() {
        let h = harness(ScriptedBackend::new().with_latency(Duration::from_millis(60))).await;
        let mut rx = h.handle.subscribe();

        h.handle.start(jobs(&["J1", "J2", "J3"])).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ProgressEvent::JobStarted { id: id("J1") });

        h.handle.reset().await.unwrap();
        // acknowledged only once the in-flight saga and its reload are done
        assert_eq!(h.backend.calls_of(SagaStep::Commit), 1);
        assert_eq!(h.host.reloads(), 1);
        let state = h.handle.status();
        assert_eq!(state, WorkflowState::default());
        assert!(h.store.load().await.unwrap().is_none());

        // The stale run never picks up J2
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.backend.calls_of(SagaStep::Discover), 1);
        assert_eq!(h.handle.status().phase, RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_resume_runs_checkpointed_jobs() {
        let h = harness(ScriptedBackend::new()).await;
        let checkpoint = Checkpoint::new(jobs(&["J2", "J3"]), InstanceId::new("tab-1"), "run-0");
        h.store.inner.save(&checkpoint).await.unwrap();

        let pending = h.handle.pending_checkpoint().await.unwrap().unwrap();
        assert_eq!(pending.remaining_jobs.len(), 2);

        let ack = h.handle.resume().await.unwrap().unwrap();
        assert_eq!(ack.jobs, 2);
        assert_ne!(ack.run_id, "run-0");

        let state = h.handle.finished().await.unwrap();
        assert_eq!(state.phase, RunPhase::Completed);
        let ids: Vec<_> = state.outcomes.iter().map(|o| o.job_id.to_string()).collect();
        assert_eq!(ids, vec!["J2", "J3"]);
        assert!(h.handle.pending_checkpoint().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint_is_noop() {
        let h = harness(ScriptedBackend::new()).await;
        assert!(h.handle.resume().await.unwrap().is_none());
        assert_eq!(h.handle.status().phase, RunPhase::Idle);
    }
}
