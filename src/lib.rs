//! # Saga Runner
//!
//! Drives an ordered list of independent transactional jobs against an external,
//! session-authenticated environment that reloads (and loses all in-environment state)
//! after every job.
//!
//! This crate provides functionality to:
//! - Locate a live instance of the target environment
//! - Relay requests into it through an outer and an inner relay tier
//! - Run a three-step dependent-token saga per job, with one bounded replay
//! - Survive the reload between jobs and persist resumable checkpoints

pub mod actor;
pub mod adapter;
pub mod config;
pub mod domain;
pub mod locator;
pub mod port;
pub mod relay;
pub mod saga;

// Re-export commonly used types
pub use actor::{OrchestratorDeps, OrchestratorHandle, RunAck};
pub use domain::{
    checkpoint::Checkpoint,
    error::OrchestratorError,
    event::ProgressEvent,
    job::{Job, JobId},
    state::{RunPhase, WorkflowState}
};
