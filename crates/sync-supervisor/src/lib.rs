//! Calendar sync supervisor
//!
//! Wires the `supervision` components to the outside world: configuration
//! from the environment, Telegram delivery, logging and the run report.

pub mod alert;
pub mod config;
pub mod supervisor;
pub mod telemetry;

pub use alert::{AlertChannel, DeliveryStatus, DisabledChannel, TelegramChannel};
pub use config::{SupervisorConfig, TelegramCredentials};
pub use supervisor::{Supervisor, SupervisorOutcome, SupervisorSettings};
pub use telemetry::RunReport;
