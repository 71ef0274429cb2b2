//! One-time passwords delivered by email.

pub mod client;
pub mod extract;
pub mod mailbox;

pub use client::GmailOtpClient;
pub use extract::{extract_code, most_recent_code, MailCandidate, OtpMatch};
pub use mailbox::{scan_mailbox, ImapMailbox, Mailbox, RawMessage};

use crate::error::OtpError;
use async_trait::async_trait;
use std::time::Duration;

/// Source of OTP codes for `enter_otp` steps
#[async_trait]
pub trait OtpProvider: Send + Sync {
    /// Wait up to `timeout` for a fresh code; `Ok(None)` when none arrived
    async fn wait_for_otp(&self, timeout: Duration) -> Result<Option<String>, OtpError>;
}
