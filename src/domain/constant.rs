//! Domain Events - Structured events for internal monitoring and debugging

/// Orchestrator Actor Events
pub mod orchestrator {
    pub const ORCHESTRATOR_STARTED: &str = "orchestrator.started";
    pub const RUN_REQUESTED: &str = "run.requested";
    pub const RUN_REJECTED: &str = "run.rejected";
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_COMPLETED: &str = "run.completed";
    pub const RUN_ABORTED: &str = "run.aborted";
    pub const RUN_RESUMED: &str = "run.resumed";
    pub const RUN_STALE: &str = "run.stale";
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_FINISHED: &str = "job.finished";
    pub const JOB_RETRYING: &str = "job.retrying";
    pub const RELOAD_STARTED: &str = "reload.started";
    pub const RELOAD_COMPLETED: &str = "reload.completed";
    pub const RELOAD_TIMED_OUT: &str = "reload.timed_out";
    pub const STATE_RESET: &str = "state.reset";
    pub const EVENT_REJECTED: &str = "state.event_rejected";
    pub const NOTIFICATION_DROPPED: &str = "notification.dropped";
}

/// Environment Locator Events
pub mod locator {
    pub const TARGETED_LOOKUP: &str = "locate.targeted";
    pub const TARGETED_LOOKUP_FAILED: &str = "locate.targeted_failed";
    pub const ENUMERATION_FALLBACK: &str = "locate.enumeration_fallback";
    pub const INSTANCE_FOUND: &str = "locate.found";
    pub const INSTANCE_NOT_FOUND: &str = "locate.not_found";
}

/// Relay Bridge Events
pub mod relay {
    pub const REQUEST_SENT: &str = "relay.request_sent";
    pub const REQUEST_REJECTED: &str = "relay.request_rejected";
    pub const REPLY_RECEIVED: &str = "relay.reply_received";
    pub const REQUEST_TIMED_OUT: &str = "relay.request_timed_out";
    pub const ENVELOPE_IGNORED: &str = "relay.envelope_ignored";
    pub const TIER_INSTALLING: &str = "relay.tier_installing";
    pub const TIER_INSTALL_FAILED: &str = "relay.tier_install_failed";
    pub const DISPATCH_FAILED: &str = "relay.dispatch_failed";
    pub const BRIDGE_INVALIDATED: &str = "relay.bridge_invalidated";
}

/// Readiness Probe Events
pub mod probe {
    pub const PROBE_STARTED: &str = "probe.started";
    pub const PROBE_READY: &str = "probe.ready";
    pub const PROBE_POLLING: &str = "probe.polling";
    pub const PROBE_TIMED_OUT: &str = "probe.timed_out";
}

/// Transaction Executor Events
pub mod saga {
    pub const ATTEMPT_STARTED: &str = "saga.attempt_started";
    pub const STEP_SENT: &str = "saga.step_sent";
    pub const STEP_FAILED: &str = "saga.step_failed";
    pub const COMMIT_RETRY: &str = "saga.commit_retry";
    pub const ATTEMPT_FINISHED: &str = "saga.attempt_finished";
    pub const SCOPE_SWITCH_REQUESTED: &str = "saga.scope_switch_requested";
    pub const SCOPE_SWITCH_UNCONFIRMED: &str = "saga.scope_switch_unconfirmed";
    pub const CREDENTIAL_MISSING: &str = "saga.credential_missing";
}

/// Checkpoint Store Events
pub mod checkpoint {
    pub const CHECKPOINT_WRITTEN: &str = "checkpoint.written";
    pub const CHECKPOINT_CLEARED: &str = "checkpoint.cleared";
    pub const CHECKPOINT_LOADED: &str = "checkpoint.loaded";
    pub const CHECKPOINT_FAILED: &str = "checkpoint.failed";
}

/// Simulated Environment Events
pub mod simulator {
    pub const RELAY_INSTALLED: &str = "simulator.relay_installed";
    pub const RELAY_INSTALL_REFUSED: &str = "simulator.relay_install_refused";
    pub const INSTANCE_RELOADING: &str = "simulator.instance_reloading";
    pub const INSTANCE_RELOADED: &str = "simulator.instance_reloaded";
}
