use std::path::PathBuf;

use clap::Parser;
use supervision::{FileHeartbeatStore, ProcessEngine, SystemClock};
use sync_supervisor::alert::{AlertChannel, DisabledChannel, TelegramChannel};
use sync_supervisor::config::{parse_hours, SupervisorConfig};
use sync_supervisor::telemetry::{init_tracing, RunReport};
use sync_supervisor::{Supervisor, SupervisorSettings};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sync engine program (overrides SYNC_ENGINE)
    #[arg(long)]
    engine: Option<String>,

    /// Hours between success heartbeats, 0 disables them (overrides HEARTBEAT_INTERVAL_HOURS)
    #[arg(long)]
    heartbeat_hours: Option<String>,

    /// Heartbeat timestamp file (overrides HEARTBEAT_STATE_FILE)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Name used in message titles (overrides SYNC_LABEL)
    #[arg(long)]
    label: Option<String>,

    /// Write a JSON run report here (overrides SYNC_REPORT_PATH)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Compose and log messages but never deliver them
    #[arg(long, default_value_t = false)]
    no_alert: bool,
}

impl Args {
    fn apply(self, config: &mut SupervisorConfig) {
        if let Some(engine) = self.engine {
            config.engine.program = engine;
        }
        if let Some(hours) = self.heartbeat_hours {
            config.heartbeat = parse_hours("--heartbeat-hours", &hours);
        }
        if let Some(state_file) = self.state_file {
            config.state_file = state_file;
        }
        if let Some(label) = self.label {
            config.label = label;
        }
        if let Some(report) = self.report {
            config.report_path = Some(report);
        }
    }
}

fn alert_channel(config: &SupervisorConfig, no_alert: bool) -> Box<dyn AlertChannel> {
    if no_alert {
        return Box::new(DisabledChannel);
    }
    match TelegramChannel::new(&config.telegram_api_url, config.telegram.clone()) {
        Ok(channel) => {
            if !channel.is_configured() {
                info!("TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set, alerts will be skipped");
            }
            Box::new(channel)
        }
        Err(e) => {
            warn!(error = %e, "Alert channel unavailable, messages will only be logged");
            Box::new(DisabledChannel)
        }
    }
}

fn main() {
    init_tracing();

    let args = Args::parse();
    let no_alert = args.no_alert;
    let mut config = SupervisorConfig::from_env();
    args.apply(&mut config);

    let engine = ProcessEngine::new(config.engine.clone());
    info!(
        engine = %engine.command().program,
        args = ?engine.command().full_args(),
        verbose_args = ?engine.command().verbose_args,
        heartbeat_hours = config.heartbeat.interval_hours,
        state_file = %config.state_file.display(),
        "Sync supervisor starting"
    );

    let channel = alert_channel(&config, no_alert);
    let supervisor = Supervisor::new(
        engine,
        FileHeartbeatStore::new(&config.state_file),
        channel.as_ref(),
        SystemClock,
        SupervisorSettings::from(&config),
    );
    let outcome = supervisor.run();

    if let Some(path) = &config.report_path {
        let report = RunReport::from_outcome(&config.label, &outcome);
        match report.write(path) {
            Ok(()) => info!(path = %path.display(), "Run report written"),
            Err(e) => warn!(error = %e, "Could not write run report"),
        }
    }

    std::process::exit(outcome.exit_code);
}
