//! Per-job transaction saga

pub mod classify;
pub mod executor;

pub use classify::{MarkerClassifier, Verdict};
pub use executor::{SagaReport, SagaSettings, TransactionExecutor};
