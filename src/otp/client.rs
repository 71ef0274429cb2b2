use super::extract::OtpMatch;
use super::mailbox::{scan_mailbox, ImapMailbox};
use super::OtpProvider;
use crate::config::MailboxConfig;
use crate::error::OtpError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Codes dated up to this long before a wait started still count
const CLOCK_SKEW_SECS: i64 = 60;

/// Fetches OTP codes from a Gmail inbox over IMAP
#[derive(Debug, Clone)]
pub struct GmailOtpClient {
    config: MailboxConfig,
    poll_interval: Duration,
}

impl GmailOtpClient {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config,
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    /// One scan of the inbox.
    ///
    /// Connection and login failures are errors; an empty inbox or mail
    /// without a code is `Ok(None)`.
    pub async fn fetch_latest_otp(&self) -> Result<Option<OtpMatch>, OtpError> {
        // One socket timeout per protocol round trip
        self.scan_within(self.config.io_timeout * 6).await
    }

    async fn scan_within(&self, limit: Duration) -> Result<Option<OtpMatch>, OtpError> {
        let config = self.config.clone();
        let scan = tokio::task::spawn_blocking(move || {
            let mut mailbox = ImapMailbox::connect(&config)?;
            let found = scan_mailbox(&mut mailbox, config.window, config.max_messages, Utc::now());
            mailbox.logout();
            found
        });

        match tokio::time::timeout(limit, scan).await {
            Ok(joined) => joined.map_err(|e| OtpError::Worker(e.to_string()))?,
            Err(_) => Err(OtpError::Timeout(limit)),
        }
    }

    /// Poll until a code dated after `since` (minus clock skew) shows up
    pub async fn wait_for_code_since(
        &self,
        since: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Option<String>, OtpError> {
        log::debug!("Waiting for an OTP for {}", self.config.address);
        poll_for_code(
            |remaining| self.scan_within(remaining),
            since,
            timeout,
            self.poll_interval,
        )
        .await
    }
}

/// Scan repeatedly until a fresh code appears or `timeout` elapses.
///
/// Failed scans are retried; the last failure is returned only if the
/// deadline passes without a later scan succeeding.
async fn poll_for_code<F, Fut>(
    mut scan: F,
    since: DateTime<Utc>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<String>, OtpError>
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = Result<Option<OtpMatch>, OtpError>>,
{
    let threshold = since - chrono::Duration::seconds(CLOCK_SKEW_SECS);
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_error = None;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match scan(remaining).await {
            Ok(Some(found)) if is_fresh(&found, threshold) => {
                log::info!("OTP received (message {})", found.seq);
                return Ok(Some(found.code));
            }
            Ok(Some(found)) => {
                log::debug!("Ignoring stale code from message {}", found.seq);
                last_error = None;
            }
            Ok(None) => {
                log::debug!("No OTP yet");
                last_error = None;
            }
            Err(e) => {
                log::warn!("Mailbox scan failed, retrying: {}", e);
                last_error = Some(e);
            }
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            log::warn!("No OTP arrived within {}s", timeout.as_secs());
            return match last_error {
                Some(e) => Err(e),
                None => Ok(None),
            };
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Undated codes are accepted; there is nothing to compare against
fn is_fresh(found: &OtpMatch, threshold: DateTime<Utc>) -> bool {
    found.received_at.map_or(true, |at| at >= threshold)
}

#[async_trait]
impl OtpProvider for GmailOtpClient {
    async fn wait_for_otp(&self, timeout: Duration) -> Result<Option<String>, OtpError> {
        self.wait_for_code_since(Utc::now(), timeout).await
    }
}
