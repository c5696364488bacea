use std::path::PathBuf;

use supervision::{EngineCommand, FileHeartbeatStore, HeartbeatGate};
use tracing::warn;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_LABEL: &str = "caldav-sync";

/// Bot credentials for the alert transport.
#[derive(Clone, PartialEq, Eq)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

// The token ends up in request URLs; keep it out of logs.
impl std::fmt::Debug for TelegramCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramCredentials")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Top-level supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How to invoke the sync engine
    pub engine: EngineCommand,
    /// Alert credentials; `None` skips delivery
    pub telegram: Option<TelegramCredentials>,
    pub telegram_api_url: String,
    pub heartbeat: HeartbeatGate,
    /// Persisted heartbeat timestamp
    pub state_file: PathBuf,
    /// Name used in message titles
    pub label: String,
    /// Optional JSON run report
    pub report_path: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SupervisorConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty values count as unset. Malformed values are logged and replaced
    /// by their default; nothing here can fail.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = EngineCommand::default();

        let engine = EngineCommand {
            program: get("SYNC_ENGINE").unwrap_or(defaults.program),
            args: split_args("SYNC_ENGINE_ARGS", get("SYNC_ENGINE_ARGS"), defaults.args),
            verbose_args: split_args(
                "SYNC_ENGINE_VERBOSE_ARGS",
                get("SYNC_ENGINE_VERBOSE_ARGS"),
                defaults.verbose_args,
            ),
        };

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramCredentials { bot_token, chat_id }),
            (None, None) => None,
            _ => {
                warn!("Only one of TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID is set, alerts disabled");
                None
            }
        };

        let heartbeat = get("HEARTBEAT_INTERVAL_HOURS")
            .map(|raw| parse_hours("HEARTBEAT_INTERVAL_HOURS", &raw))
            .unwrap_or_default();

        Self {
            engine,
            telegram,
            telegram_api_url: get("TELEGRAM_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.into()),
            heartbeat,
            state_file: get("HEARTBEAT_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(FileHeartbeatStore::default_path),
            label: get("SYNC_LABEL").unwrap_or_else(|| DEFAULT_LABEL.into()),
            report_path: get("SYNC_REPORT_PATH").map(PathBuf::from),
        }
    }
}

/// Parse a heartbeat interval, falling back to the default on garbage.
pub fn parse_hours(key: &str, raw: &str) -> HeartbeatGate {
    match raw.trim().parse::<u64>() {
        Ok(hours) => HeartbeatGate::new(hours),
        Err(_) => {
            let fallback = HeartbeatGate::default();
            warn!(
                key,
                value = raw,
                default = fallback.interval_hours,
                "Invalid heartbeat interval, using default"
            );
            fallback
        }
    }
}

fn split_args(key: &str, raw: Option<String>, default: Vec<String>) -> Vec<String> {
    let Some(raw) = raw else {
        return default;
    };
    match shlex::split(&raw) {
        Some(args) => args,
        None => {
            warn!(key, value = %raw, "Unbalanced quoting in engine arguments, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.engine, EngineCommand::default());
        assert!(config.telegram.is_none());
        assert_eq!(config.telegram_api_url, DEFAULT_TELEGRAM_API_URL);
        assert_eq!(config.heartbeat.interval_hours, 24);
        assert_eq!(config.state_file, FileHeartbeatStore::default_path());
        assert_eq!(config.label, "caldav-sync");
        assert!(config.report_path.is_none());
    }

    #[test]
    fn test_full_environment() {
        let config = SupervisorConfig::from_lookup(lookup(&[
            ("SYNC_ENGINE", "/usr/local/bin/vdirsyncer"),
            ("SYNC_ENGINE_ARGS", "-c '/etc/vdir/my config' sync"),
            ("SYNC_ENGINE_VERBOSE_ARGS", "--verbosity DEBUG"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "-42"),
            ("TELEGRAM_API_URL", "http://localhost:8080/"),
            ("HEARTBEAT_INTERVAL_HOURS", "6"),
            ("HEARTBEAT_STATE_FILE", "/var/lib/sync/heartbeat"),
            ("SYNC_LABEL", "family-calendar"),
            ("SYNC_REPORT_PATH", "/var/lib/sync/report.json"),
        ]));

        assert_eq!(config.engine.program, "/usr/local/bin/vdirsyncer");
        assert_eq!(config.engine.args, vec!["-c", "/etc/vdir/my config", "sync"]);
        assert_eq!(config.engine.verbose_args, vec!["--verbosity", "DEBUG"]);
        let creds = config.telegram.unwrap();
        assert_eq!(creds.bot_token, "123:abc");
        assert_eq!(creds.chat_id, "-42");
        assert_eq!(config.telegram_api_url, "http://localhost:8080");
        assert_eq!(config.heartbeat.interval_hours, 6);
        assert_eq!(config.state_file, PathBuf::from("/var/lib/sync/heartbeat"));
        assert_eq!(config.label, "family-calendar");
        assert_eq!(
            config.report_path,
            Some(PathBuf::from("/var/lib/sync/report.json"))
        );
    }

    #[test]
    fn test_credentials_need_both_values() {
        let only_token = SupervisorConfig::from_lookup(lookup(&[("TELEGRAM_BOT_TOKEN", "t")]));
        assert!(only_token.telegram.is_none());

        let empty_chat = SupervisorConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("TELEGRAM_CHAT_ID", ""),
        ]));
        assert!(empty_chat.telegram.is_none());
    }

    #[test]
    fn test_invalid_interval_falls_back() {
        let config =
            SupervisorConfig::from_lookup(lookup(&[("HEARTBEAT_INTERVAL_HOURS", "daily")]));
        assert_eq!(config.heartbeat.interval_hours, 24);

        let disabled = SupervisorConfig::from_lookup(lookup(&[("HEARTBEAT_INTERVAL_HOURS", "0")]));
        assert!(!disabled.heartbeat.is_enabled());
    }

    #[test]
    fn test_unbalanced_args_fall_back() {
        let config = SupervisorConfig::from_lookup(lookup(&[("SYNC_ENGINE_ARGS", "sync 'oops")]));
        assert_eq!(config.engine.args, vec!["sync"]);
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = TelegramCredentials {
            bot_token: "123:secret".into(),
            chat_id: "-42".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("-42"));
    }
}
