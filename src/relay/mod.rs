//! Two-tier relay into an environment instance
//!
//! The orchestrator only ever talks to the outer tier through a [`bridge::RelayBridge`]; the
//! outer tier forwards to the inner tier, which holds the environment's identity.

pub mod bridge;
pub mod inner;
pub mod outer;
pub mod probe;

pub use bridge::{PendingRequest, RelayBridge};
pub use inner::InnerRelay;
pub use outer::OuterRelay;
pub use probe::{ProbeSettings, ReadinessProbe};
