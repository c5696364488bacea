//! Selective Retry: recovery from the engine's torn-down sessions
//!
//! Overlapping async sessions inside the engine can close one another
//! mid-request, which surfaces as a session-closed error naming a single
//! collection. Re-running everything re-triggers the same race, so only the
//! named collections are re-run, one at a time.
//!
//! The recovery is an explicit state machine:
//!
//! ```text
//! Initial → Retrying(units) | Resolved | Unresolved
//! Retrying(units) → Resolved | Unresolved
//! ```
//!
//! `Retrying` is entered at most once per run; there is no edge back into it,
//! so a retry that closes its session again is not retried.

use crate::classifier::RunResult;
use crate::engine::SyncEngine;
use crate::signature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

/// Collections named by session-closed errors.
///
/// Deduplicated and iterated in lexicographic order, so retries and their
/// log lines are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailedUnitSet(BTreeSet<String>);

impl FailedUnitSet {
    pub fn from_error_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        Self(
            lines
                .iter()
                .filter_map(|line| signature::session_closed_unit(line.as_ref()))
                .map(String::from)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// States of the recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "units", rename_all = "snake_case")]
pub enum RetryState {
    /// Initial run captured, nothing decided yet.
    Initial,
    /// Re-running the listed collections sequentially.
    Retrying(FailedUnitSet),
    /// Final outcome is success. Terminal.
    Resolved,
    /// Final outcome is failure. Terminal.
    Unresolved,
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Unresolved)
    }
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "Initial"),
            Self::Retrying(units) => write!(f, "Retrying({})", units.len()),
            Self::Resolved => write!(f, "Resolved"),
            Self::Unresolved => write!(f, "Unresolved"),
        }
    }
}

fn is_legal_transition(from: &RetryState, to: &RetryState) -> bool {
    use RetryState::*;
    matches!(
        (from, to),
        (Initial, Retrying(_))
            | (Initial, Resolved)
            | (Initial, Unresolved)
            | (Retrying(_), Resolved)
            | (Retrying(_), Unresolved)
    )
}

/// A single recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RetryState,
    pub to: RetryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: RetryState,
    pub to: RetryState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal retry transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the recovery state and logs every transition.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    current: RetryState,
    transitions: Vec<TransitionRecord>,
}

impl RetryMachine {
    pub fn new() -> Self {
        Self {
            current: RetryState::Initial,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> &RetryState {
        &self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Move to `to`, or refuse if the edge is not in the graph.
    pub fn advance(&mut self, to: RetryState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(&self.current, &to) {
            return Err(IllegalTransition {
                from: self.current.clone(),
                to,
            });
        }

        debug!(from = %self.current, to = %to, reason, "Retry state transition");

        self.transitions.push(TransitionRecord {
            from: self.current.clone(),
            to: to.clone(),
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Path through the states, for logs.
    pub fn summary(&self) -> String {
        let mut states = vec![RetryState::Initial.to_string()];
        states.extend(self.transitions.iter().map(|t| t.to.to_string()));
        states.join(" → ")
    }
}

impl Default for RetryMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of re-running one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRetry {
    pub unit: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_lines: Vec<String>,
}

/// Everything the rest of the supervisor needs after recovery.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    initial: RunResult,
    combined: RunResult,
    retried: Vec<UnitRetry>,
    remaining_errors: Vec<String>,
    machine: RetryMachine,
}

impl RetryOutcome {
    /// The untouched first run.
    pub fn initial(&self) -> &RunResult {
        &self.initial
    }

    /// First run plus every retry output, carrying the final exit code.
    pub fn combined(&self) -> &RunResult {
        &self.combined
    }

    pub fn final_exit_code(&self) -> i32 {
        self.combined.exit_code()
    }

    pub fn retried(&self) -> &[UnitRetry] {
        &self.retried
    }

    /// Error lines still standing once recovered session errors are removed.
    pub fn remaining_errors(&self) -> &[String] {
        &self.remaining_errors
    }

    pub fn state(&self) -> &RetryState {
        self.machine.current()
    }

    pub fn machine(&self) -> &RetryMachine {
        &self.machine
    }
}

/// Apply the selective retry to a captured first run.
///
/// Retries only when the run failed and named at least one collection in a
/// session-closed error. The overall run becomes a success when every
/// retried collection exits 0 and no other error line was present.
/// Otherwise the first run's exit code stands.
pub fn supervise<E: SyncEngine + ?Sized>(engine: &E, initial: RunResult) -> RetryOutcome {
    let mut machine = RetryMachine::new();
    let failed = FailedUnitSet::from_error_lines(initial.error_lines());

    if initial.succeeded() || failed.is_empty() {
        let (to, reason) = if initial.succeeded() {
            (RetryState::Resolved, "engine exited 0")
        } else {
            (RetryState::Unresolved, "no retryable session-closed collection")
        };
        step(&mut machine, to, reason);
        return RetryOutcome {
            remaining_errors: initial.error_lines().to_vec(),
            combined: initial.clone(),
            initial,
            retried: Vec::new(),
            machine,
        };
    }

    info!(
        units = failed.len(),
        exit_code = initial.exit_code(),
        "Session-closed errors detected, retrying affected collections one at a time"
    );
    step(
        &mut machine,
        RetryState::Retrying(failed.clone()),
        "session-closed errors",
    );

    let mut buffer = initial.raw_output().to_string();
    let mut retried = Vec::with_capacity(failed.len());
    for unit in failed.iter() {
        info!(unit, "Retrying collection");
        let run = engine.run_unit(unit);
        info!(unit, exit_code = run.exit_code(), "Collection retry finished");

        if !buffer.is_empty() && !buffer.ends_with('\n') {
            buffer.push('\n');
        }
        buffer.push_str(run.raw_output());

        retried.push(UnitRetry {
            unit: unit.to_string(),
            exit_code: run.exit_code(),
            error_lines: run.error_lines().to_vec(),
        });
    }

    let other_errors: Vec<String> = initial
        .error_lines()
        .iter()
        .filter(|line| signature::session_closed_unit(line).is_none())
        .cloned()
        .collect();
    let retries_clean = retried.iter().all(|r| r.exit_code == 0);
    let retry_errors = retried.iter().flat_map(|r| r.error_lines.iter().cloned());

    let (final_code, remaining_errors) = if retries_clean && other_errors.is_empty() {
        step(&mut machine, RetryState::Resolved, "all retried collections succeeded");
        (0, retry_errors.collect())
    } else {
        let reason = if retries_clean {
            "other errors present"
        } else {
            "a retried collection failed"
        };
        step(&mut machine, RetryState::Unresolved, reason);
        let mut errors = initial.error_lines().to_vec();
        errors.extend(retry_errors);
        (initial.exit_code(), errors)
    };

    info!(
        final_exit_code = final_code,
        path = %machine.summary(),
        "Selective retry finished"
    );

    RetryOutcome {
        combined: RunResult::new(final_code, buffer),
        initial,
        retried,
        remaining_errors,
        machine,
    }
}

fn step(machine: &mut RetryMachine, to: RetryState, reason: &str) {
    if let Err(err) = machine.advance(to, Some(reason)) {
        tracing::error!(%err, "Retry state machine rejected transition");
    }
}
