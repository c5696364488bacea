//! Calendar Sync Supervision Library
//!
//! This library provides the decision-making half of the sync supervisor:
//! - Running the external sync engine and capturing its interleaved output
//! - Classifying that output into error, warning, unit and copy lines
//! - Selectively retrying collections that failed with a transient session error
//! - Rate-limiting success heartbeats through a persisted timestamp
//! - Composing Failure and Heartbeat notifications
//!
//! # Flow
//!
//! ```text
//! run_full ──► classify ──► RetryMachine ──► Resolved ──► HeartbeatGate ──► Heartbeat
//!                              │
//!                              └──► Unresolved ──► (diagnostic run) ──► Failure
//! ```
//!
//! Transport (where a message actually goes) lives in the `sync-supervisor`
//! binary crate.

pub mod classifier;
pub mod compose;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod retry;
pub mod signature;

pub use classifier::{classify, ClassifiedOutput, FailureSignature, RunResult};
pub use compose::{
    compose_failure, compose_heartbeat, needs_diagnostic, needs_failure_report, Block,
    FailureReport, Hint, NotificationMessage, Severity,
};
pub use engine::{EngineCommand, ProcessEngine, SyncEngine, SPAWN_FAILURE_EXIT_CODE};
pub use error::{StateError, StateResult};
pub use heartbeat::{
    Clock, FileHeartbeatStore, FixedClock, HeartbeatGate, HeartbeatState, HeartbeatStore,
    MemoryHeartbeatStore, SystemClock,
};
pub use retry::{
    supervise, FailedUnitSet, IllegalTransition, RetryMachine, RetryOutcome, RetryState,
    TransitionRecord, UnitRetry,
};
pub use signature::FailureKind;
