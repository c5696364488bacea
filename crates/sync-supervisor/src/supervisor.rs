//! One supervised sync run, end to end.
//!
//! ```text
//! run_full → supervise (selective retry) → failure?  ── yes → [diagnostic run] → compose_failure → deliver
//!                                                   └─ no  → load heartbeat → gate → compose_heartbeat → deliver → save
//! ```
//!
//! Every collaborator is a trait so the whole flow runs in tests without a
//! subprocess, a network or a real clock.

use chrono::{DateTime, Utc};
use supervision::{
    compose_failure, compose_heartbeat, needs_diagnostic, needs_failure_report, supervise, Clock,
    FailureReport, HeartbeatGate, HeartbeatState, HeartbeatStore, NotificationMessage,
    RetryOutcome, SyncEngine,
};
use tracing::{info, warn};

use crate::alert::{AlertChannel, DeliveryStatus};
use crate::config::{SupervisorConfig, DEFAULT_LABEL};

/// Knobs the run itself needs.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub label: String,
    pub heartbeat: HeartbeatGate,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            heartbeat: HeartbeatGate::default(),
        }
    }
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            label: config.label.clone(),
            heartbeat: config.heartbeat,
        }
    }
}

/// What happened during one run.
#[derive(Debug, Clone)]
pub struct SupervisorOutcome {
    /// Exit code to hand back to the scheduler
    pub exit_code: i32,
    pub retry: RetryOutcome,
    /// Exit code of the verbose run, when one was made
    pub diagnostic_exit_code: Option<i32>,
    pub notification: Option<NotificationMessage>,
    pub delivery: Option<DeliveryStatus>,
    pub heartbeat_sent: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct Supervisor<E, S, A, C> {
    engine: E,
    store: S,
    channel: A,
    clock: C,
    settings: SupervisorSettings,
}

impl<E, S, A, C> Supervisor<E, S, A, C>
where
    E: SyncEngine,
    S: HeartbeatStore,
    A: AlertChannel,
    C: Clock,
{
    pub fn new(engine: E, store: S, channel: A, clock: C, settings: SupervisorSettings) -> Self {
        Self {
            engine,
            store,
            channel,
            clock,
            settings,
        }
    }

    /// Run the sync once and decide what to tell whom.
    pub fn run(&self) -> SupervisorOutcome {
        let started_at = self.clock.now();
        info!(label = %self.settings.label, "Starting sync run");

        let initial = self.engine.run_full();
        info!(
            exit_code = initial.exit_code(),
            errors = initial.error_lines().len(),
            warnings = initial.warning_lines().len(),
            units = initial.unit_lines().len(),
            copied = initial.copied_count(),
            "Sync engine finished"
        );

        let retry = supervise(&self.engine, initial);
        let exit_code = retry.final_exit_code();

        let mut outcome = SupervisorOutcome {
            exit_code,
            diagnostic_exit_code: None,
            notification: None,
            delivery: None,
            heartbeat_sent: false,
            started_at,
            finished_at: started_at,
            retry,
        };

        if needs_failure_report(exit_code, outcome.retry.remaining_errors()) {
            self.report_failure(&mut outcome);
        } else {
            self.maybe_heartbeat(&mut outcome);
        }

        outcome.finished_at = self.clock.now();
        info!(
            exit_code = outcome.exit_code,
            retry = %outcome.retry.machine().summary(),
            delivery = ?outcome.delivery,
            "Sync run supervised"
        );
        outcome
    }

    fn report_failure(&self, outcome: &mut SupervisorOutcome) {
        let retry = &outcome.retry;
        let errors = retry.remaining_errors();

        let diagnostic = if needs_diagnostic(errors) {
            info!("Connectivity or auth failure, collecting a verbose trace");
            let run = self.engine.run_diagnostic();
            outcome.diagnostic_exit_code = Some(run.exit_code());
            Some(run)
        } else {
            None
        };

        let message = compose_failure(&FailureReport {
            label: &self.settings.label,
            exit_code: outcome.exit_code,
            errors,
            copied_count: retry.combined().copied_count(),
            retried: retry.retried(),
            diagnostic: diagnostic.as_ref(),
        });
        warn!(
            exit_code = outcome.exit_code,
            errors = errors.len(),
            hints = ?message.hints,
            "Sync failed, sending alert"
        );

        outcome.delivery = Some(self.channel.deliver(&message));
        outcome.notification = Some(message);
    }

    fn maybe_heartbeat(&self, outcome: &mut SupervisorOutcome) {
        let gate = self.settings.heartbeat;
        if !gate.is_enabled() {
            info!("Heartbeat disabled");
            return;
        }

        let state = self.store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read heartbeat state, treating as never sent");
            HeartbeatState::default()
        });
        let now = self.clock.now();
        let last_notified = state
            .last_notified_at()
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        if !gate.should_emit(state, now) {
            info!(
                %last_notified,
                interval_hours = gate.interval_hours,
                "Heartbeat not due"
            );
            return;
        }

        info!(
            %last_notified,
            interval_hours = gate.interval_hours,
            "Heartbeat due"
        );
        let message = compose_heartbeat(&self.settings.label, outcome.retry.combined());
        outcome.delivery = Some(self.channel.deliver(&message));
        outcome.notification = Some(message);
        outcome.heartbeat_sent = true;

        // Saved whatever the delivery status, so a flaky transport cannot
        // turn every run into a heartbeat.
        if let Err(e) = self.store.save(HeartbeatState::at(now)) {
            warn!(error = %e, "Could not persist heartbeat state");
        }
    }
}
