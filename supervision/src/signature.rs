//! Error signatures of the sync engine
//!
//! The only place that knows how the external engine words its failures.
//! When the engine changes a message, update the patterns here and the
//! pinned strings in the tests below.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Torn-down session from the engine's overlapping async requests.
/// Example: `error: Unknown error occurred for caldav_gcal/Personal: Session is closed`
static SESSION_CLOSED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^error: Unknown error occurred for (?P<unit>.*?): Session is closed").unwrap()
});

static CONNECTIVITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(name or service not known|temporary failure in name resolution|nodename nor servname|could not resolve|cannot connect to host|connection refused|connection reset|network is unreachable|timed out|getaddrinfo)",
    )
    .unwrap()
});

static AUTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\b401\b|\b403\b|unauthori[sz]ed|forbidden|invalid_grant|invalid_client|token has been expired or revoked|authentication failed|access denied)",
    )
    .unwrap()
});

/// Coarse failure categories derived from error lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// DNS or network failure reaching a remote
    ConnectivityError,
    /// Credentials rejected by a remote
    AuthError,
    /// Known engine defect, retried per collection
    SessionClosedError,
    /// Anything else
    OtherError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectivityError => write!(f, "connectivity"),
            Self::AuthError => write!(f, "auth"),
            Self::SessionClosedError => write!(f, "session_closed"),
            Self::OtherError => write!(f, "other"),
        }
    }
}

/// Extract the collection named by a session-closed error line.
///
/// Returns `None` when the line is not a session-closed error, and also when
/// it is one but the embedded identifier is blank: a blank scope cannot be
/// retried, so such lines count as ordinary errors.
pub fn session_closed_unit(line: &str) -> Option<&str> {
    let caps = SESSION_CLOSED_PATTERN.captures(line)?;
    let unit = caps.name("unit")?.as_str().trim();
    if unit.is_empty() {
        None
    } else {
        Some(unit)
    }
}

/// Whether a line reports a DNS or connectivity failure.
pub fn is_connectivity_failure(line: &str) -> bool {
    CONNECTIVITY_PATTERN.is_match(line)
}

/// Whether a line reports rejected credentials.
pub fn is_auth_failure(line: &str) -> bool {
    AUTH_PATTERN.is_match(line)
}

/// All categories a single error line falls into.
///
/// A line matching none of the known signatures is `OtherError`.
pub fn kinds_of(line: &str) -> Vec<FailureKind> {
    let mut kinds = Vec::new();
    if session_closed_unit(line).is_some() {
        kinds.push(FailureKind::SessionClosedError);
    }
    if is_connectivity_failure(line) {
        kinds.push(FailureKind::ConnectivityError);
    }
    if is_auth_failure(line) {
        kinds.push(FailureKind::AuthError);
    }
    if kinds.is_empty() {
        kinds.push(FailureKind::OtherError);
    }
    kinds
}
