//! Concrete implementations of the ports

pub mod channel;
pub mod credential;
pub mod simulator;
pub mod storage;
