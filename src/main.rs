//! # Saga Runner CLI
//!
//! Runs job files against the in-process simulated environment and manages the
//! checkpoint left by interrupted runs.
//!
//! ## Usage
//!
//! ```bash
//! # Run the jobs of a file
//! saga-runner run --jobs jobs.yaml
//!
//! # Resume an interrupted run
//! saga-runner resume
//!
//! # Inspect or delete the pending checkpoint
//! saga-runner checkpoint show
//! saga-runner checkpoint clear
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `warn`).

use std::{fs, sync::Arc};

use clap::Parser;
use saga_runner::{
    OrchestratorDeps, OrchestratorHandle, ProgressEvent, RunPhase, WorkflowState,
    adapter::{
        credential::{FallbackCredentialSource, StorageKeyCredential, session_storage},
        simulator::{ScriptedBackend, SimulatedHost, SimulatorSettings},
        storage::{CheckpointBackend, CheckpointStoreFactory}
    },
    config::{Config, load_config, load_config_from},
    domain::{
        command::{CheckpointCommands, ConfigCommands, RunnerCli, RunnerCommand},
        environment::{InstanceDescriptor, InstanceId},
        error::OrchestratorError,
        job::parse_jobs,
        transaction::JobOutcomeRow
    },
    port::checkpoint::CheckpointStore
};
use tabled::Table;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), OrchestratorError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        )
        .init();

    let cli = RunnerCli::parse();
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?
    };
    if let Some(backend) = cli.backend {
        config.checkpoint_backend = backend;
    }

    let store = checkpoint_store(&config)?;

    match cli.command {
        RunnerCommand::Run { jobs } => {
            let content = fs::read_to_string(&jobs)?;
            let jobs = parse_jobs(&content)?;
            let handle = spawn_orchestrator(&config, store).await?;

            let progress = handle.subscribe();
            let ack = handle.start(jobs).await?;
            println!("Run {} started on {} ({} jobs)", ack.run_id, ack.instance_id, ack.jobs);
            let state = follow(&handle, progress).await?;
            handle.shutdown();
            report(&state);
            Ok(())
        }
        RunnerCommand::Resume => {
            let handle = spawn_orchestrator(&config, store).await?;
            let progress = handle.subscribe();
            let result = match handle.resume().await? {
                Some(ack) => {
                    println!("Resumed as run {} on {} ({} jobs left)", ack.run_id, ack.instance_id, ack.jobs);
                    let state = follow(&handle, progress).await?;
                    report(&state);
                    Ok(())
                }
                None => {
                    println!("No checkpoint to resume");
                    Ok(())
                }
            };
            handle.shutdown();
            result
        }
        RunnerCommand::Checkpoint { command } => match command {
            CheckpointCommands::Show => {
                match store.load().await? {
                    Some(checkpoint) => println!("{}", serde_json::to_string_pretty(&checkpoint)?),
                    None => println!("No pending checkpoint")
                }
                Ok(())
            }
            CheckpointCommands::Clear => {
                store.clear().await?;
                println!("Checkpoint cleared");
                Ok(())
            }
        },
        RunnerCommand::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", serde_yaml::to_string(&config)?);
                Ok(())
            }
        }
    }
}

fn checkpoint_store(config: &Config) -> Result<Arc<dyn CheckpointStore>, OrchestratorError> {
    match config.checkpoint_backend {
        CheckpointBackend::InMemory => CheckpointStoreFactory::create(CheckpointBackend::InMemory, None),
        CheckpointBackend::RocksDb => {
            let path = config.checkpoint_dir()?;
            fs::create_dir_all(&path)?;
            CheckpointStoreFactory::create(CheckpointBackend::RocksDb, Some(&path))
        }
    }
}

/// Orchestrator wired to a simulated environment with one instance under the configured prefix
async fn spawn_orchestrator(
    config: &Config,
    checkpoints: Arc<dyn CheckpointStore>
) -> Result<OrchestratorHandle, OrchestratorError> {
    let storage = session_storage(&[("session", r#"{"csrf_token":"simulated-session"}"#)]);
    let credentials = FallbackCredentialSource::from_keys(storage.clone(), &["auth_token"])
        .then(Arc::new(StorageKeyCredential::new(storage, "session").json_field("csrf_token")));

    let host = Arc::new(SimulatedHost::new(
        Arc::new(ScriptedBackend::new()),
        Arc::new(credentials),
        SimulatorSettings::default()
    ));
    host.add_instance(InstanceDescriptor {
        id:           InstanceId::new("sim-1"),
        url:          format!("{}simulated/console", config.target_url_prefix),
        title:        "Simulated console".to_string(),
        active_scope: None
    });

    let deps = OrchestratorDeps {
        host,
        checkpoints,
        matcher: config.matcher(),
        probe: config.probe_settings(),
        saga: config.saga_settings(),
        request_timeout: config.request_timeout(),
        reload_timeout: config.reload_timeout()
    };
    let (handle, _) = OrchestratorHandle::spawn(deps).await?;
    Ok(handle)
}

/// Print progress notifications until the run is over
async fn follow(
    handle: &OrchestratorHandle,
    mut progress: broadcast::Receiver<ProgressEvent>
) -> Result<WorkflowState, OrchestratorError> {
    loop {
        match progress.recv().await {
            Ok(event) => {
                println!("  {}", event);
                if matches!(event, ProgressEvent::WorkflowComplete { .. } | ProgressEvent::FatalError { .. }) {
                    break;
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break
        }
    }
    handle.finished().await
}

fn report(state: &WorkflowState) {
    let rows: Vec<JobOutcomeRow> = state.outcomes.iter().map(JobOutcomeRow::from).collect();
    println!("{}", Table::new(rows));

    match state.phase {
        RunPhase::Aborted => {
            println!("Run aborted: {}", state.fatal_reason.as_deref().unwrap_or("unknown reason"));
        }
        _ => println!("{} of {} jobs succeeded", state.succeeded(), state.total_jobs())
    }
}
