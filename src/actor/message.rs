//! Typed messages for actor communication

use ractor::{Message, RpcReplyPort};
use serde::{Deserialize, Serialize};

use crate::domain::{environment::InstanceId, error::OrchestratorError, job::Job};

/// Immediate acknowledgement of an accepted run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAck {
    pub run_id:      String,
    pub instance_id: InstanceId,
    pub jobs:        usize
}

/// Messages for the Orchestrator actor
#[derive(Debug)]
pub enum OrchestratorMessage {
    /// Locate the environment and start a run over `jobs`
    Start { jobs: Vec<Job>, reply: RpcReplyPort<Result<RunAck, OrchestratorError>> },
    /// Resume the remaining jobs of a persisted checkpoint, if any
    Resume { reply: RpcReplyPort<Result<Option<RunAck>, OrchestratorError>> },
    /// Process the job under the cursor of run `generation`
    RunNextJob { generation: u64 },
    /// Clear the checkpoint and the in-memory state
    Reset { reply: RpcReplyPort<()> }
}

// Implement Message trait for Ractor
impl Message for OrchestratorMessage {}
