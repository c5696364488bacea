//! Logging bootstrap and the optional per-run JSON report.
//!
//! Logs go to stderr: stdout carries the engine output forwarded verbatim.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use supervision::{FailureKind, RetryState, Severity, TransitionRecord, UnitRetry};

use crate::alert::DeliveryStatus;
use crate::supervisor::SupervisorOutcome;

/// Current schema version for run reports.
/// Bump when adding/removing/renaming fields.
pub const REPORT_SCHEMA_VERSION: u8 = 1;

/// Install the global `tracing` subscriber. Filter from `RUST_LOG`, default `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Snapshot of one supervised run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: u8,
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub initial_exit_code: i32,
    pub final_exit_code: i32,
    pub retry_state: RetryState,
    pub transitions: Vec<TransitionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retried: Vec<UnitRetry>,
    pub error_count: usize,
    pub warning_count: usize,
    pub unit_count: usize,
    pub copied_count: usize,
    pub failure_kinds: Vec<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryStatus>,
    pub heartbeat_sent: bool,
}

impl RunReport {
    pub fn from_outcome(label: &str, outcome: &SupervisorOutcome) -> Self {
        let retry = &outcome.retry;
        let combined = retry.combined();
        let failure_kinds = supervision::FailureSignature::from_run(
            outcome.exit_code,
            retry.remaining_errors(),
        )
        .kinds()
        .collect();

        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            label: label.to_string(),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            initial_exit_code: retry.initial().exit_code(),
            final_exit_code: outcome.exit_code,
            retry_state: retry.state().clone(),
            transitions: retry.machine().transitions().to_vec(),
            retried: retry.retried().to_vec(),
            error_count: retry.remaining_errors().len(),
            warning_count: combined.warning_lines().len(),
            unit_count: combined.unit_lines().len(),
            copied_count: combined.copied_count(),
            failure_kinds,
            diagnostic_exit_code: outcome.diagnostic_exit_code,
            notification: outcome.notification.as_ref().map(|m| m.severity),
            delivery: outcome.delivery,
            heartbeat_sent: outcome.heartbeat_sent,
        }
    }

    /// Write the report as pretty JSON, via a temp file and a rename.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;

        let temp_path = temp_sibling(path);
        std::fs::write(&temp_path, content)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to move run report into {}", path.display()))?;
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
