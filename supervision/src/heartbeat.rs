//! Heartbeat Gate
//!
//! Decides whether a successful run should be announced, based on the time
//! since the last announcement. The persisted state is a single epoch-seconds
//! timestamp; it is passed in and out explicitly so the decision is pure and
//! the clock and the store can be swapped in tests.

use crate::error::{StateError, StateResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const SECS_PER_HOUR: i64 = 3600;

/// Source of "now".
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Last successful heartbeat, in epoch seconds. 0 means never.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatState {
    pub last_notified: i64,
}

impl HeartbeatState {
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            last_notified: time.timestamp(),
        }
    }

    pub fn last_notified_at(&self) -> Option<DateTime<Utc>> {
        if self.last_notified == 0 {
            return None;
        }
        Utc.timestamp_opt(self.last_notified, 0).single()
    }
}

/// Rate limit for success announcements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatGate {
    /// Minimum whole hours between heartbeats; 0 disables them
    pub interval_hours: u64,
}

impl Default for HeartbeatGate {
    fn default() -> Self {
        Self { interval_hours: 24 }
    }
}

impl HeartbeatGate {
    pub fn new(interval_hours: u64) -> Self {
        Self { interval_hours }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval_hours > 0
    }

    /// Whether a heartbeat is due at `now`.
    ///
    /// Due when enabled and at least `interval_hours` whole hours have passed
    /// since the last one. A timestamp in the future is treated as stale.
    pub fn should_emit(&self, state: HeartbeatState, now: DateTime<Utc>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let elapsed_secs = now.timestamp().saturating_sub(state.last_notified);
        if elapsed_secs < 0 {
            tracing::warn!(
                last_notified = state.last_notified,
                now = now.timestamp(),
                "Heartbeat timestamp is in the future, ignoring it"
            );
            return true;
        }
        let elapsed_hours = (elapsed_secs / SECS_PER_HOUR) as u64;
        elapsed_hours >= self.interval_hours
    }
}

/// Where the heartbeat timestamp lives between runs.
pub trait HeartbeatStore {
    /// Read the state. A store that was never written reads as the default.
    fn load(&self) -> StateResult<HeartbeatState>;

    fn save(&self, state: HeartbeatState) -> StateResult<()>;
}

impl<T: HeartbeatStore + ?Sized> HeartbeatStore for &T {
    fn load(&self) -> StateResult<HeartbeatState> {
        (**self).load()
    }

    fn save(&self, state: HeartbeatState) -> StateResult<()> {
        (**self).save(state)
    }
}

/// Text file holding a decimal epoch-seconds integer.
#[derive(Debug, Clone)]
pub struct FileHeartbeatStore {
    path: PathBuf,
}

impl FileHeartbeatStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `<temp dir>/sync-supervisor-heartbeat`
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join("sync-supervisor-heartbeat")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl HeartbeatStore for FileHeartbeatStore {
    fn load(&self) -> StateResult<HeartbeatState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HeartbeatState::default())
            }
            Err(e) => return Err(StateError::io(&self.path, e)),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(HeartbeatState::default());
        }
        trimmed
            .parse::<i64>()
            .map(|last_notified| HeartbeatState { last_notified })
            .map_err(|_| StateError::Parse {
                path: self.path.clone(),
                content: trimmed.to_string(),
            })
    }

    /// Write to a sibling temp file, then rename over the target.
    fn save(&self, state: HeartbeatState) -> StateResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        let temp_path = self.temp_path();
        std::fs::write(&temp_path, format!("{}\n", state.last_notified))
            .map_err(|e| StateError::io(&temp_path, e))?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| StateError::io(&self.path, e))?;
        Ok(())
    }
}

/// In-memory store, mostly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryHeartbeatStore {
    state: Cell<HeartbeatState>,
    saves: Cell<usize>,
}

impl MemoryHeartbeatStore {
    pub fn new(state: HeartbeatState) -> Self {
        Self {
            state: Cell::new(state),
            saves: Cell::new(0),
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state.get()
    }

    /// How many times `save` was called.
    pub fn saves(&self) -> usize {
        self.saves.get()
    }
}

impl HeartbeatStore for MemoryHeartbeatStore {
    fn load(&self) -> StateResult<HeartbeatState> {
        Ok(self.state.get())
    }

    fn save(&self, state: HeartbeatState) -> StateResult<()> {
        self.state.set(state);
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}
