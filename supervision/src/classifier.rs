//! Output classification
//!
//! Splits captured engine output into the line classes the supervisor acts
//! on. Matching is line-anchored and case-sensitive; nothing here interprets
//! why a line was printed.

use crate::signature::{self, FailureKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const ERROR_PREFIX: &str = "error:";
const WARNING_PREFIX: &str = "warning:";
const UNIT_PREFIX: &str = "Syncing";
const COPY_PREFIX: &str = "Copying";

/// Line classes extracted from one output buffer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedOutput {
    /// Lines starting with `error:`, in output order
    pub error_lines: Vec<String>,
    /// Lines starting with `warning:`, in output order
    pub warning_lines: Vec<String>,
    /// Lines starting with `Syncing`, one per collection touched
    pub unit_lines: Vec<String>,
    /// Number of lines starting with `Copying`
    pub copied_count: usize,
}

/// Classify a raw output buffer.
pub fn classify(raw: &str) -> ClassifiedOutput {
    let mut out = ClassifiedOutput::default();
    for line in raw.lines() {
        if line.starts_with(ERROR_PREFIX) {
            out.error_lines.push(line.to_string());
        } else if line.starts_with(WARNING_PREFIX) {
            out.warning_lines.push(line.to_string());
        } else if line.starts_with(UNIT_PREFIX) {
            out.unit_lines.push(line.to_string());
        } else if line.starts_with(COPY_PREFIX) {
            out.copied_count += 1;
        }
    }
    out
}

/// One captured engine invocation.
///
/// Classified at construction and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    exit_code: i32,
    raw_output: String,
    classified: ClassifiedOutput,
}

impl RunResult {
    pub fn new(exit_code: i32, raw_output: impl Into<String>) -> Self {
        let raw_output = raw_output.into();
        let classified = classify(&raw_output);
        Self {
            exit_code,
            raw_output,
            classified,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn raw_output(&self) -> &str {
        &self.raw_output
    }

    pub fn classified(&self) -> &ClassifiedOutput {
        &self.classified
    }

    pub fn error_lines(&self) -> &[String] {
        &self.classified.error_lines
    }

    pub fn warning_lines(&self) -> &[String] {
        &self.classified.warning_lines
    }

    pub fn unit_lines(&self) -> &[String] {
        &self.classified.unit_lines
    }

    pub fn copied_count(&self) -> usize {
        self.classified.copied_count
    }

    /// Failure categories present in this run.
    pub fn signature(&self) -> FailureSignature {
        FailureSignature::from_run(self.exit_code, self.error_lines())
    }
}

/// Set of failure categories present in a run.
///
/// Empty means "None": a clean run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureSignature(BTreeSet<FailureKind>);

impl FailureSignature {
    /// Categories present in a set of error lines.
    pub fn from_error_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        Self(
            lines
                .iter()
                .flat_map(|line| signature::kinds_of(line.as_ref()))
                .collect(),
        )
    }

    /// Categories of a whole run. A failing exit without any error line
    /// still counts as `OtherError`.
    pub fn from_run<S: AsRef<str>>(exit_code: i32, error_lines: &[S]) -> Self {
        let mut sig = Self::from_error_lines(error_lines);
        if exit_code != 0 && sig.0.is_empty() {
            sig.0.insert(FailureKind::OtherError);
        }
        sig
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, kind: FailureKind) -> bool {
        self.0.contains(&kind)
    }

    /// Whether a verbose diagnostic run would help explain the failure.
    pub fn wants_diagnostic(&self) -> bool {
        self.contains(FailureKind::ConnectivityError) || self.contains(FailureKind::AuthError)
    }

    pub fn kinds(&self) -> impl Iterator<Item = FailureKind> + '_ {
        self.0.iter().copied()
    }
}
