//! OTP extraction from mail messages.

use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, ParsedMail};
use regex::Regex;
use std::sync::OnceLock;

/// A message reduced to what OTP extraction needs
#[derive(Debug, Clone)]
pub struct MailCandidate {
    /// IMAP sequence number
    pub seq: u32,
    pub subject: String,
    pub body: String,
    pub received_at: Option<DateTime<Utc>>,
}

/// A code found in a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpMatch {
    pub code: String,
    pub seq: u32,
    pub received_at: Option<DateTime<Utc>>,
}

struct OtpPattern {
    regex: Regex,
    subject_only: bool,
}

/// Ordered, most specific first. The bare-digits pattern only applies to
/// subjects; bodies are full of years, prices and order numbers.
fn patterns() -> &'static [OtpPattern] {
    static PATTERNS: OnceLock<Vec<OtpPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        const SEP: &str = r"\s*(?:is\b)?\s*[:\-]?\s*(?:<[^>]+>\s*)*";
        [
            (format!(r"(?i)\bOTP\b{}(\d{{4,6}})\b", SEP), false),
            (r"(?i)<(?:strong|b)>\s*(\d{4,6})\s*</(?:strong|b)>".to_string(), false),
            (
                format!(
                    r"(?i)(?:one[- ]time (?:password|passcode|code)|verification code|security code|login code|code){}(\d{{4,6}})\b",
                    SEP
                ),
                false,
            ),
            (r"\b(\d{4,6})\b".to_string(), true),
        ]
        .into_iter()
        .map(|(pattern, subject_only)| OtpPattern {
            regex: Regex::new(&pattern).expect("OTP patterns are valid"),
            subject_only,
        })
        .collect()
    })
}

/// Extract a 4-6 digit code, trying each pattern on the subject and then the body
pub fn extract_code(subject: &str, body: &str) -> Option<String> {
    for pattern in patterns() {
        if let Some(code) = capture(&pattern.regex, subject) {
            return Some(code);
        }
        if !pattern.subject_only {
            if let Some(code) = capture(&pattern.regex, body) {
                return Some(code);
            }
        }
    }
    None
}

fn capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse a raw RFC 822 message. `fallback_date` (the server's internal date)
/// is used when the `Date` header is missing or unparseable.
pub fn parse_message(
    seq: u32,
    raw: &[u8],
    fallback_date: Option<DateTime<Utc>>,
) -> Result<MailCandidate, mailparse::MailParseError> {
    let parsed = mailparse::parse_mail(raw)?;

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let received_at = parsed
        .headers
        .get_first_value("Date")
        .and_then(|date| mailparse::dateparse(&date).ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .or(fallback_date);

    let mut body = String::new();
    collect_text(&parsed, &mut body);

    Ok(MailCandidate {
        seq,
        subject,
        body,
        received_at,
    })
}

fn collect_text(part: &ParsedMail<'_>, out: &mut String) {
    if part.subparts.is_empty() {
        if part.ctype.mimetype.starts_with("text/") {
            match part.get_body() {
                Ok(text) => {
                    out.push_str(&text);
                    out.push('\n');
                }
                Err(e) => log::debug!("Skipping undecodable {} part: {}", part.ctype.mimetype, e),
            }
        }
        return;
    }

    for sub in &part.subparts {
        collect_text(sub, out);
    }
}

/// Extract codes from every candidate and keep the most recently dated one.
///
/// Undated messages rank oldest; equal dates go to the higher sequence number.
pub fn most_recent_code(candidates: &[MailCandidate]) -> Option<OtpMatch> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let code = extract_code(&candidate.subject, &candidate.body)?;
            log::debug!(
                "Message {} ({:?}) carries code {}",
                candidate.seq,
                candidate.received_at,
                code
            );
            Some(OtpMatch {
                code,
                seq: candidate.seq,
                received_at: candidate.received_at,
            })
        })
        .max_by_key(|m| (m.received_at, m.seq))
}
