//! Actor-based orchestration
//!
//! The orchestrator is a single Ractor actor; controllers talk to it through an
//! [`OrchestratorHandle`] and observe it through a state snapshot and a progress channel.

pub mod handle;
pub mod message;
pub mod orchestrator;

pub use handle::*;
pub use message::*;
pub use orchestrator::*;
