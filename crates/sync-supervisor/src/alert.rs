//! Alert Channel
//!
//! Best-effort delivery of composed messages to a Telegram chat. Nothing in
//! here returns an error to the supervisor: missing credentials skip, any
//! transport failure is logged and reported as [`DeliveryStatus::Failed`].

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use supervision::{Block, NotificationMessage};
use tracing::{debug, info, warn};

use crate::config::TelegramCredentials;

/// Request timeout for the send call.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram rejects longer message texts.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const FENCE: &str = "```";
const TRUNCATION_MARKER: &str = "\n…";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The transport answered, whatever the status code.
    Sent,
    /// Delivery is not configured.
    Skipped,
    /// The request never got a response.
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Where composed messages go.
pub trait AlertChannel {
    fn deliver(&self, message: &NotificationMessage) -> DeliveryStatus;
}

impl<T: AlertChannel + ?Sized> AlertChannel for &T {
    fn deliver(&self, message: &NotificationMessage) -> DeliveryStatus {
        (**self).deliver(message)
    }
}

/// Channel used with `--no-alert`: logs the message and sends nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledChannel;

impl AlertChannel for DisabledChannel {
    fn deliver(&self, message: &NotificationMessage) -> DeliveryStatus {
        info!(
            severity = %message.severity,
            text = %message.plain_text(),
            "Alert delivery disabled"
        );
        DeliveryStatus::Skipped
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramChannel {
    client: reqwest::blocking::Client,
    api_url: String,
    credentials: Option<TelegramCredentials>,
}

impl TelegramChannel {
    pub fn new(api_url: impl Into<String>, credentials: Option<TelegramCredentials>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Failed to build HTTP client for alerts")?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            credentials,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn endpoint(&self, credentials: &TelegramCredentials) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, credentials.bot_token)
    }
}

impl AlertChannel for TelegramChannel {
    fn deliver(&self, message: &NotificationMessage) -> DeliveryStatus {
        let Some(credentials) = &self.credentials else {
            debug!(severity = %message.severity, "No alert credentials, skipping delivery");
            return DeliveryStatus::Skipped;
        };

        let text = render_markdown(message);
        let body = SendMessage {
            chat_id: &credentials.chat_id,
            text: &text,
            parse_mode: "Markdown",
        };

        match self.client.post(self.endpoint(credentials)).json(&body).send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    info!(severity = %message.severity, "Alert delivered");
                } else {
                    warn!(
                        severity = %message.severity,
                        status = status.as_u16(),
                        "Alert transport answered with an error status"
                    );
                }
                DeliveryStatus::Sent
            }
            Err(e) => {
                // The token is part of the URL.
                warn!(
                    severity = %message.severity,
                    error = %e.without_url(),
                    "Alert delivery failed"
                );
                DeliveryStatus::Failed
            }
        }
    }
}

/// Escape text for Telegram's legacy Markdown.
///
/// Backticks become `'`; `_`, `*` and `[` get a backslash.
pub fn sanitize_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '`' => out.push('\''),
            '_' | '*' | '[' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Make a title safe inside the bold entity.
///
/// Escapes are not honoured inside an entity, so `*` is dropped and a
/// backtick becomes `'`; everything else is kept literally.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| *c != '*')
        .map(|c| if c == '`' { '\'' } else { c })
        .collect()
}

/// Make a line safe inside a code fence. Only a backtick can end the fence.
pub fn sanitize_verbatim(line: &str) -> String {
    line.replace('`', "'")
}

/// Render a message as `"<icon> *<title>*\n\n<body>"` in Telegram Markdown.
pub fn render_markdown(message: &NotificationMessage) -> String {
    let mut out = format!(
        "{} *{}*",
        message.severity.icon(),
        sanitize_title(&message.title)
    );
    for block in &message.blocks {
        out.push_str("\n\n");
        match block {
            Block::Text { text } => out.push_str(&sanitize_markdown(text)),
            Block::Verbatim { heading, lines } => {
                out.push_str(&sanitize_markdown(heading));
                out.push('\n');
                out.push_str(FENCE);
                for line in lines {
                    out.push('\n');
                    out.push_str(&sanitize_verbatim(line));
                }
                out.push('\n');
                out.push_str(FENCE);
            }
        }
    }
    truncate_message(out)
}

/// Cap a rendered message at [`MAX_MESSAGE_CHARS`].
///
/// The cut lands on a line boundary so a fence is never split; an unclosed
/// fence gets its closing line back.
fn truncate_message(text: String) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text;
    }
    let budget = MAX_MESSAGE_CHARS - TRUNCATION_MARKER.chars().count() - FENCE.len() - 1;
    let mut cut: String = text.chars().take(budget).collect();
    if let Some(end) = cut.rfind('\n') {
        cut.truncate(end);
    }
    // A single over-long line can still end inside a fence marker.
    let kept = cut.trim_end_matches('`').len();
    cut.truncate(kept);
    if cut.matches(FENCE).count() % 2 == 1 {
        cut.push('\n');
        cut.push_str(FENCE);
    }
    cut.push_str(TRUNCATION_MARKER);
    cut
}
