//! Domain model: jobs, environment handles, relay envelopes, saga results and the
//! immutable workflow state with its events

pub mod checkpoint;
pub mod command;
pub mod constant;
pub mod envelope;
pub mod environment;
pub mod error;
pub mod event;
pub mod job;
pub mod state;
pub mod transaction;
