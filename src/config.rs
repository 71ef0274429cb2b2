//! Typed configuration shared by the runner, the OTP client and the dashboard.
//!
//! The binary fills these from command-line flags with environment fallbacks;
//! tests construct them directly.

use std::path::PathBuf;
use std::time::Duration;

/// Hosted datastore (Supabase) connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`
    pub url: String,

    /// Anon or service key sent as `apikey` and bearer token
    pub api_key: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(15),
        }
    }

    /// Base URL of the PostgREST API
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url.trim_end_matches('/'))
    }

    /// Websocket URL of the realtime endpoint
    pub fn realtime_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws, self.api_key
        )
    }
}

/// IMAP mailbox used to receive one-time passwords
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub address: String,
    pub app_password: String,
    pub host: String,
    pub port: u16,

    /// Only unread mail received within this window is considered
    pub window: Duration,

    /// Maximum number of candidate messages parsed per scan
    pub max_messages: usize,

    /// Connect, read and write timeout on the IMAP socket
    pub io_timeout: Duration,
}

impl MailboxConfig {
    pub fn gmail(address: impl Into<String>, app_password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            app_password: app_password.into(),
            host: "imap.gmail.com".to_string(),
            port: 993,
            window: Duration::from_secs(10 * 60),
            max_messages: 10,
            io_timeout: Duration::from_secs(20),
        }
    }
}

/// Tuning for the flow executor
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Timeout applied to steps that do not declare their own
    pub default_timeout: Duration,

    /// Interval between readiness probes while waiting
    pub poll_interval: Duration,

    /// Timeout used by `if_visible` probes and preference-list probing
    pub probe_timeout: Duration,

    /// How long `enter_otp` keeps polling the mailbox
    pub otp_timeout: Duration,

    /// Where failure screenshots are written (None disables them)
    pub artifact_dir: Option<PathBuf>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            probe_timeout: Duration::from_secs(2),
            otp_timeout: Duration::from_secs(60),
            artifact_dir: Some(PathBuf::from("./artifacts")),
        }
    }
}

/// True when running under a known CI provider
pub fn is_ci() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
        || std::env::var("JENKINS_HOME").is_ok()
        || std::env::var("CIRCLECI").is_ok()
}
