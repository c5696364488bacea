//! End-to-end supervision scenarios.
//!
//! Drives the public `Supervisor` with a scripted engine, a recording alert
//! channel, a fixed clock and an in-memory heartbeat store. The last test
//! runs a real subprocess against a mock Telegram server.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use supervision::{
    FixedClock, Hint, HeartbeatGate, HeartbeatState, HeartbeatStore, MemoryHeartbeatStore,
    NotificationMessage, RetryState, RunResult, Severity, SyncEngine,
};
use sync_supervisor::{AlertChannel, DeliveryStatus, Supervisor, SupervisorSettings};

const SESSION_CLOSED_PERSONAL: &str =
    "error: Unknown error occurred for caldav_gcal/Personal: Session is closed";

/// Engine replaying canned results and recording every call.
struct ScriptedEngine {
    full: RunResult,
    units: Mutex<VecDeque<RunResult>>,
    diagnostic: RunResult,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    fn new(exit_code: i32, raw: &str) -> Self {
        Self {
            full: RunResult::new(exit_code, raw),
            units: Mutex::new(VecDeque::new()),
            diagnostic: RunResult::new(exit_code, ""),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_unit_result(self, exit_code: i32, raw: &str) -> Self {
        self.units
            .lock()
            .unwrap()
            .push_back(RunResult::new(exit_code, raw));
        self
    }

    fn with_diagnostic(mut self, raw: &str) -> Self {
        self.diagnostic = RunResult::new(self.full.exit_code(), raw);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SyncEngine for ScriptedEngine {
    fn run_full(&self) -> RunResult {
        self.calls.lock().unwrap().push("full".into());
        self.full.clone()
    }

    fn run_unit(&self, unit: &str) -> RunResult {
        self.calls.lock().unwrap().push(format!("unit:{unit}"));
        self.units
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RunResult::new(0, format!("Syncing {unit}\n")))
    }

    fn run_diagnostic(&self) -> RunResult {
        self.calls.lock().unwrap().push("diagnostic".into());
        self.diagnostic.clone()
    }
}

/// Channel that keeps every message it is handed.
#[derive(Default)]
struct RecordingChannel {
    delivered: Mutex<Vec<NotificationMessage>>,
}

impl RecordingChannel {
    fn delivered(&self) -> Vec<NotificationMessage> {
        self.delivered.lock().unwrap().clone()
    }
}

impl AlertChannel for RecordingChannel {
    fn deliver(&self, message: &NotificationMessage) -> DeliveryStatus {
        self.delivered.lock().unwrap().push(message.clone());
        DeliveryStatus::Sent
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
}

fn settings() -> SupervisorSettings {
    SupervisorSettings {
        label: "caldav-sync".into(),
        heartbeat: HeartbeatGate::new(24),
    }
}

#[test]
fn test_healthy_run_sends_heartbeat_when_interval_elapsed() {
    let engine = ScriptedEngine::new(
        0,
        "Syncing caldav_gcal/Work\nCopying event 1\nSyncing caldav_gcal/Home\nCopying event 2\nCopying event 3\n",
    );
    let channel = RecordingChannel::default();
    let store = MemoryHeartbeatStore::new(HeartbeatState::at(now() - Duration::hours(25)));

    let outcome = Supervisor::new(&engine, &store, &channel, FixedClock(now()), settings()).run();

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.heartbeat_sent);
    assert_eq!(outcome.delivery, Some(DeliveryStatus::Sent));
    assert_eq!(engine.calls(), vec!["full"]);

    let delivered = channel.delivered();
    assert_eq!(delivered.len(), 1);
    let message = &delivered[0];
    assert_eq!(message.severity, Severity::Heartbeat);
    assert_eq!(message.title, "caldav-sync: sync healthy");
    assert_eq!(message.unit_summary, vec!["Work", "Home"]);
    assert_eq!(message.copied_count, 3);
    assert!(message.warnings.is_empty());

    assert_eq!(store.saves(), 1);
    assert_eq!(store.load().unwrap(), HeartbeatState::at(now()));
}

#[test]
fn test_healthy_run_within_interval_stays_quiet() {
    let engine = ScriptedEngine::new(0, "Syncing caldav_gcal/Work\n");
    let channel = RecordingChannel::default();
    let last = HeartbeatState::at(now() - Duration::hours(3));
    let store = MemoryHeartbeatStore::new(last);

    let outcome = Supervisor::new(&engine, &store, &channel, FixedClock(now()), settings()).run();

    assert_eq!(outcome.exit_code, 0);
    assert!(!outcome.heartbeat_sent);
    assert!(outcome.notification.is_none());
    assert!(channel.delivered().is_empty());
    assert_eq!(store.saves(), 0);
    assert_eq!(store.state(), last);
}

#[test]
fn test_session_closed_error_recovers_by_retrying_the_collection() {
    let engine = ScriptedEngine::new(
        1,
        &format!("Syncing caldav_gcal/Work\n{SESSION_CLOSED_PERSONAL}\n"),
    )
    .with_unit_result(0, "Syncing caldav_gcal/Personal\nCopying event 9\n");
    let channel = RecordingChannel::default();
    let store = MemoryHeartbeatStore::new(HeartbeatState::at(now() - Duration::hours(1)));

    let outcome = Supervisor::new(&engine, &store, &channel, FixedClock(now()), settings()).run();

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.retry.state(), &RetryState::Resolved);
    assert_eq!(engine.calls(), vec!["full", "unit:caldav_gcal/Personal"]);
    assert!(outcome.notification.is_none());
    assert!(channel.delivered().is_empty());
    assert_eq!(store.saves(), 0);
}

#[test]
fn test_recovered_run_reports_every_unit_once_in_heartbeat() {
    let engine = ScriptedEngine::new(
        1,
        &format!("Syncing caldav_gcal/Personal\nSyncing caldav_gcal/Work\n{SESSION_CLOSED_PERSONAL}\n"),
    )
    .with_unit_result(0, "Syncing caldav_gcal/Personal\nCopying event 9\n");
    let channel = RecordingChannel::default();
    let store = MemoryHeartbeatStore::default();

    let outcome = Supervisor::new(&engine, &store, &channel, FixedClock(now()), settings()).run();

    assert_eq!(outcome.exit_code, 0);
    let delivered = channel.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].unit_summary, vec!["Personal", "Work"]);
    assert_eq!(delivered[0].copied_count, 1);
}

#[test]
fn test_failed_retry_keeps_original_exit_code_and_lists_units() {
    let engine = ScriptedEngine::new(
        1,
        &format!(
            "{SESSION_CLOSED_PERSONAL}\n\
             error: Unknown error occurred for caldav_gcal/Work: Session is closed\n\
             {SESSION_CLOSED_PERSONAL}\n"
        ),
    )
    .with_unit_result(0, "Syncing caldav_gcal/Personal\n")
    .with_unit_result(
        1,
        "error: Unknown error occurred for caldav_gcal/Work: Session is closed\n",
    );
    let channel = RecordingChannel::default();
    let store = MemoryHeartbeatStore::default();

    let outcome = Supervisor::new(&engine, &store, &channel, FixedClock(now()), settings()).run();

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.retry.state(), &RetryState::Unresolved);
    assert_eq!(
        engine.calls(),
        vec!["full", "unit:caldav_gcal/Personal", "unit:caldav_gcal/Work"]
    );

    let delivered = channel.delivered();
    assert_eq!(delivered.len(), 1);
    let text = delivered[0].plain_text();
    assert_eq!(delivered[0].severity, Severity::Failure);
    assert!(text.contains("• caldav_gcal/Personal (exit 0)"));
    assert!(text.contains("• caldav_gcal/Work (exit 1)"));
    assert_eq!(store.saves(), 0);
}

#[test]
fn test_auth_failure_alerts_with_hint_and_trace() {
    let engine = ScriptedEngine::new(1, "Syncing caldav_gcal/Work\nerror: 401 Unauthorized\n")
        .with_diagnostic("debug: POST https://apidata.googleusercontent.com\ndebug: status 401\n");
    let channel = RecordingChannel::default();
    let store = MemoryHeartbeatStore::default();

    let outcome = Supervisor::new(&engine, &store, &channel, FixedClock(now()), settings()).run();

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(engine.calls(), vec!["full", "diagnostic"]);

    let delivered = channel.delivered();
    assert_eq!(delivered.len(), 1);
    let message = &delivered[0];
    assert_eq!(message.severity, Severity::Failure);
    assert_eq!(message.title, "caldav-sync: sync failed");
    assert_eq!(message.error_excerpt, vec!["error: 401 Unauthorized"]);
    assert_eq!(message.hints, vec![Hint::Auth]);
    assert_eq!(
        message.diagnostic_trace.as_deref(),
        Some(
            &[
                "debug: POST https://apidata.googleusercontent.com".to_string(),
                "debug: status 401".to_string(),
            ][..]
        )
    );
    assert!(message.plain_text().contains("Diagnostic trace"));
    assert_eq!(store.saves(), 0);
}

#[cfg(unix)]
#[test]
fn test_real_engine_recovers_and_announces_over_http() {
    use supervision::{EngineCommand, FileHeartbeatStore, ProcessEngine};
    use sync_supervisor::{TelegramChannel, TelegramCredentials};

    let script = r#"
if [ -n "$1" ]; then
    echo "Syncing $1"
    echo "Copying event from $1"
    exit 0
fi
echo "Syncing caldav_gcal/Personal"
echo "error: Unknown error occurred for caldav_gcal/Personal: Session is closed" >&2
exit 1
"#;
    let engine = ProcessEngine::new(EngineCommand {
        program: "sh".into(),
        args: vec!["-c".into(), script.into(), "sh".into()],
        verbose_args: Vec::new(),
    })
    .without_forwarding();

    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/bottest-token/sendMessage")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "chat_id": "1001",
            "parse_mode": "Markdown",
        })))
        .with_status(200)
        .with_body(r#"{"ok":true}"#)
        .expect(1)
        .create();
    let channel = TelegramChannel::new(
        server.url(),
        Some(TelegramCredentials {
            bot_token: "test-token".into(),
            chat_id: "1001".into(),
        }),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = FileHeartbeatStore::new(dir.path().join("heartbeat"));

    let outcome = Supervisor::new(engine, &store, channel, FixedClock(now()), settings()).run();

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.retry.initial().exit_code(), 1);
    assert!(outcome.heartbeat_sent);
    assert_eq!(outcome.delivery, Some(DeliveryStatus::Sent));
    assert_eq!(store.load().unwrap(), HeartbeatState::at(now()));
    mock.assert();
}
