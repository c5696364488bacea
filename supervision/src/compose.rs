//! Notification Composer
//!
//! Builds the human-readable Failure and Heartbeat messages. Excerpts are
//! capped so a message stays readable on a phone no matter how much the
//! engine printed. Rendering to a transport's markup is left to the channel;
//! this module only produces structured blocks and a plain-text form for logs.

use crate::classifier::{FailureSignature, RunResult};
use crate::retry::UnitRetry;
use crate::signature::FailureKind;
use serde::{Deserialize, Serialize};

/// First error lines quoted verbatim in a Failure message.
pub const ERROR_EXCERPT_LINES: usize = 20;
/// Last lines of the diagnostic run quoted in a Failure message.
pub const TRACE_LINES: usize = 60;
/// First warning lines quoted in a Heartbeat message.
pub const WARNING_EXCERPT_LINES: usize = 10;

const CONNECTIVITY_HINT: &str = "Connectivity problem: a remote server could not be reached \
(DNS or network failure). Check the network of the host running the sync; the next scheduled run \
will retry on its own.";
const AUTH_HINT: &str = "Authorization problem: a remote rejected the credentials. The Google \
OAuth token has most likely expired or been revoked; run the one-shot authorization script \
(authorize-google.py) again to issue a new one.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Failure,
    Heartbeat,
}

impl Severity {
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Failure => "🔴",
            Self::Heartbeat => "🟢",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failure => write!(f, "failure"),
            Self::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// Categorical hints attached to a Failure message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    Connectivity,
    Auth,
}

impl Hint {
    pub fn text(&self) -> &'static str {
        match self {
            Self::Connectivity => CONNECTIVITY_HINT,
            Self::Auth => AUTH_HINT,
        }
    }
}

/// One piece of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    /// Prose written by the supervisor.
    Text { text: String },
    /// Engine output, to be shown as-is under a heading.
    Verbatim { heading: String, lines: Vec<String> },
}

/// A composed alert or heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub severity: Severity,
    pub title: String,
    pub blocks: Vec<Block>,
    pub exit_code: i32,
    pub copied_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_excerpt: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_trace: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unit_summary: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl NotificationMessage {
    /// Markup-free rendering, for logs.
    pub fn plain_text(&self) -> String {
        let mut out = format!("{} {}", self.severity.icon(), self.title);
        for block in &self.blocks {
            out.push_str("\n\n");
            match block {
                Block::Text { text } => out.push_str(text),
                Block::Verbatim { heading, lines } => {
                    out.push_str(heading);
                    for line in lines {
                        out.push_str("\n  ");
                        out.push_str(line);
                    }
                }
            }
        }
        out
    }
}

/// Whether the final state of a run calls for a Failure message.
pub fn needs_failure_report<S: AsRef<str>>(exit_code: i32, errors: &[S]) -> bool {
    exit_code != 0 || !errors.is_empty()
}

/// Whether the errors warrant an extra verbose run for the Failure message.
pub fn needs_diagnostic<S: AsRef<str>>(errors: &[S]) -> bool {
    FailureSignature::from_error_lines(errors).wants_diagnostic()
}

/// Input of a Failure message
#[derive(Debug, Clone, Copy)]
pub struct FailureReport<'a> {
    pub label: &'a str,
    pub exit_code: i32,
    /// Error lines still standing after any retry
    pub errors: &'a [String],
    pub copied_count: usize,
    pub retried: &'a [UnitRetry],
    /// Output of the verbose diagnostic run, when one was made
    pub diagnostic: Option<&'a RunResult>,
}

pub fn compose_failure(report: &FailureReport<'_>) -> NotificationMessage {
    let signature = FailureSignature::from_error_lines(report.errors);
    let mut hints = Vec::new();
    if signature.contains(FailureKind::ConnectivityError) {
        hints.push(Hint::Connectivity);
    }
    if signature.contains(FailureKind::AuthError) {
        hints.push(Hint::Auth);
    }

    let error_excerpt: Vec<String> = report
        .errors
        .iter()
        .take(ERROR_EXCERPT_LINES)
        .cloned()
        .collect();
    let diagnostic_trace = report.diagnostic.map(|run| tail_lines(run.raw_output(), TRACE_LINES));

    let mut blocks = vec![Block::Text {
        text: format!(
            "Exit code: {}\nItems copied: {}",
            report.exit_code, report.copied_count
        ),
    }];

    if !error_excerpt.is_empty() {
        let heading = if report.errors.len() > error_excerpt.len() {
            format!(
                "Errors (first {} of {}):",
                error_excerpt.len(),
                report.errors.len()
            )
        } else {
            format!("Errors ({}):", error_excerpt.len())
        };
        blocks.push(Block::Verbatim {
            heading,
            lines: error_excerpt.clone(),
        });
    }

    for hint in &hints {
        blocks.push(Block::Text {
            text: hint.text().to_string(),
        });
    }

    if !report.retried.is_empty() {
        let mut text = String::from("Retried collections:");
        for retry in report.retried {
            text.push_str(&format!("\n• {} (exit {})", retry.unit, retry.exit_code));
        }
        blocks.push(Block::Text { text });
    }

    if let Some(trace) = &diagnostic_trace {
        let heading = format!("Diagnostic trace (last {} lines):", trace.len());
        blocks.push(Block::Verbatim {
            heading,
            lines: trace.clone(),
        });
    }

    NotificationMessage {
        severity: Severity::Failure,
        title: format!("{}: sync failed", report.label),
        blocks,
        exit_code: report.exit_code,
        copied_count: report.copied_count,
        error_excerpt,
        hints,
        diagnostic_trace,
        unit_summary: Vec::new(),
        warnings: Vec::new(),
    }
}

/// Heartbeat for a healthy run. `run` is the combined output including any
/// retries.
pub fn compose_heartbeat(label: &str, run: &RunResult) -> NotificationMessage {
    let mut unit_summary: Vec<String> = Vec::new();
    for line in run.unit_lines() {
        let name = unit_display_name(line);
        if !unit_summary.iter().any(|seen| seen == name) {
            unit_summary.push(name.to_string());
        }
    }
    let warnings: Vec<String> = run
        .warning_lines()
        .iter()
        .take(WARNING_EXCERPT_LINES)
        .cloned()
        .collect();

    let units_text = if unit_summary.is_empty() {
        "No collections reported.".to_string()
    } else {
        let mut text = String::from("Collections synced:");
        for name in &unit_summary {
            text.push_str("\n• ");
            text.push_str(name);
        }
        text
    };

    let mut blocks = vec![
        Block::Text { text: units_text },
        Block::Text {
            text: format!("Items copied: {}", run.copied_count()),
        },
    ];
    if !warnings.is_empty() {
        let total = run.warning_lines().len();
        let heading = if total > warnings.len() {
            format!("Warnings (first {} of {}):", warnings.len(), total)
        } else {
            format!("Warnings ({}):", total)
        };
        blocks.push(Block::Verbatim {
            heading,
            lines: warnings.clone(),
        });
    }

    NotificationMessage {
        severity: Severity::Heartbeat,
        title: format!("{label}: sync healthy"),
        blocks,
        exit_code: run.exit_code(),
        copied_count: run.copied_count(),
        error_excerpt: Vec::new(),
        hints: Vec::new(),
        diagnostic_trace: None,
        unit_summary,
        warnings,
    }
}

/// Short name of a collection from its `Syncing` line.
///
/// `Syncing caldav_gcal/Work` becomes `Work`; a line without a pair prefix
/// keeps everything after `Syncing `.
pub fn unit_display_name(line: &str) -> &str {
    let rest = line.strip_prefix("Syncing").unwrap_or(line).trim();
    match rest.split_once('/') {
        Some((_, collection)) if !collection.is_empty() => collection,
        _ => rest,
    }
}

fn tail_lines(raw: &str, max: usize) -> Vec<String> {
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].iter().map(|l| l.to_string()).collect()
}
