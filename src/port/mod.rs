//! Ports - the seams between the orchestrator core and the outside world

pub mod backend;
pub mod checkpoint;
pub mod credential;
pub mod environment;
pub mod relay;
