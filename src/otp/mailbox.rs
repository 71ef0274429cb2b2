//! Mailbox access for OTP scans.

use super::extract::{most_recent_code, parse_message, OtpMatch};
use crate::config::MailboxConfig;
use crate::error::OtpError;
use chrono::{DateTime, Utc};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A fetched message
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub seq: u32,
    pub bytes: Vec<u8>,
    pub internal_date: Option<DateTime<Utc>>,
}

/// The two mailbox operations a scan needs.
///
/// Blocking; scans run on the blocking thread pool.
pub trait Mailbox {
    /// Run an IMAP SEARCH and return matching sequence numbers
    fn search(&mut self, query: &str) -> Result<Vec<u32>, OtpError>;

    /// Fetch full messages without setting the \Seen flag
    fn fetch(&mut self, seqs: &[u32]) -> Result<Vec<RawMessage>, OtpError>;
}

/// Search unread mail in the trailing window, falling back to all unread
/// mail if the dated search fails, then return the most recent code among
/// the newest `limit` matches.
pub fn scan_mailbox(
    mailbox: &mut dyn Mailbox,
    window: Duration,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Option<OtpMatch>, OtpError> {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(1));
    let since = now - window;
    let dated_query = format!("UNSEEN SINCE {}", since.format("%d-%b-%Y"));

    let mut seqs = match mailbox.search(&dated_query) {
        Ok(seqs) => seqs,
        Err(e) => {
            log::warn!("Dated search failed ({}), falling back to all unread mail", e);
            mailbox.search("UNSEEN")?
        }
    };

    if seqs.is_empty() {
        log::debug!("No unread messages");
        return Ok(None);
    }

    seqs.sort_unstable_by(|a, b| b.cmp(a));
    seqs.truncate(limit);

    let candidates: Vec<_> = mailbox
        .fetch(&seqs)?
        .into_iter()
        .filter_map(|raw| match parse_message(raw.seq, &raw.bytes, raw.internal_date) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                log::warn!("Skipping unparseable message {}: {}", raw.seq, e);
                None
            }
        })
        .collect();

    log::debug!("Scanning {} candidate message(s) for a code", candidates.len());
    Ok(most_recent_code(&candidates))
}

type TlsSession = imap::Session<native_tls::TlsStream<TcpStream>>;

/// IMAP-over-TLS mailbox with INBOX selected
pub struct ImapMailbox {
    session: TlsSession,
}

impl ImapMailbox {
    pub fn connect(config: &MailboxConfig) -> Result<Self, OtpError> {
        let endpoint = format!("{}:{}", config.host, config.port);
        let failed = |e: String| OtpError::Connection(format!("{}: {}", endpoint, e));

        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| OtpError::Connection(e.to_string()))?;

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| failed(e.to_string()))?
            .next()
            .ok_or_else(|| failed("no address".to_string()))?;

        // Every blocking read and write on the socket is bounded
        let tcp = TcpStream::connect_timeout(&addr, config.io_timeout)
            .map_err(|e| failed(e.to_string()))?;
        tcp.set_read_timeout(Some(config.io_timeout))
            .map_err(|e| failed(e.to_string()))?;
        tcp.set_write_timeout(Some(config.io_timeout))
            .map_err(|e| failed(e.to_string()))?;

        let stream = tls.connect(&config.host, tcp).map_err(|e| failed(e.to_string()))?;
        let mut client = imap::Client::new(stream);
        client.read_greeting().map_err(|e| failed(e.to_string()))?;

        let mut session = client
            .login(&config.address, &config.app_password)
            .map_err(|(e, _client)| {
                log::error!("IMAP login rejected: {}", e);
                OtpError::Login(config.address.clone())
            })?;

        session
            .select("INBOX")
            .map_err(|e| OtpError::Command(format!("SELECT INBOX: {}", e)))?;

        log::debug!("Connected to {} as {}", config.host, config.address);
        Ok(Self { session })
    }

    pub fn logout(mut self) {
        if let Err(e) = self.session.logout() {
            log::debug!("IMAP logout failed: {}", e);
        }
    }
}

impl Mailbox for ImapMailbox {
    fn search(&mut self, query: &str) -> Result<Vec<u32>, OtpError> {
        self.session
            .search(query)
            .map(|ids| ids.into_iter().collect())
            .map_err(|e| OtpError::Command(format!("SEARCH {}: {}", query, e)))
    }

    fn fetch(&mut self, seqs: &[u32]) -> Result<Vec<RawMessage>, OtpError> {
        let set = seqs
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let fetches = self
            .session
            .fetch(&set, "(BODY.PEEK[] INTERNALDATE)")
            .map_err(|e| OtpError::Command(format!("FETCH {}: {}", set, e)))?;

        Ok(fetches
            .iter()
            .filter_map(|fetch| {
                let bytes = fetch.body()?.to_vec();
                Some(RawMessage {
                    seq: fetch.message,
                    bytes,
                    internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FakeMailbox {
        dated_search_fails: bool,
        unseen: Vec<u32>,
        messages: Vec<RawMessage>,
        queries: Vec<String>,
        fetched: Vec<u32>,
    }

    impl FakeMailbox {
        fn new(messages: Vec<(u32, &str)>) -> Self {
            Self {
                dated_search_fails: false,
                unseen: messages.iter().map(|(seq, _)| *seq).collect(),
                messages: messages
                    .into_iter()
                    .map(|(seq, raw)| RawMessage {
                        seq,
                        bytes: raw.as_bytes().to_vec(),
                        internal_date: None,
                    })
                    .collect(),
                queries: Vec::new(),
                fetched: Vec::new(),
            }
        }
    }

    impl Mailbox for FakeMailbox {
        fn search(&mut self, query: &str) -> Result<Vec<u32>, OtpError> {
            self.queries.push(query.to_string());
            if query.contains("SINCE") && self.dated_search_fails {
                return Err(OtpError::Command("BAD SEARCH".to_string()));
            }
            Ok(self.unseen.clone())
        }

        fn fetch(&mut self, seqs: &[u32]) -> Result<Vec<RawMessage>, OtpError> {
            self.fetched = seqs.to_vec();
            Ok(self
                .messages
                .iter()
                .filter(|m| seqs.contains(&m.seq))
                .cloned()
                .collect())
        }
    }

    fn mail(subject: &str, date: &str) -> String {
        format!("Subject: {}\r\nDate: {}\r\n\r\nHello\r\n", subject, date)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_scan_returns_latest_code() {
        let older = mail("Your OTP 1111", "Sun, 18 Oct 2026 09:50:00 +0000");
        let newer = mail("Your OTP 2222", "Sun, 18 Oct 2026 09:58:00 +0000");
        let mut mailbox = FakeMailbox::new(vec![(2, newer.as_str()), (5, older.as_str())]);

        let found = scan_mailbox(&mut mailbox, Duration::from_secs(600), 10, now())
            .unwrap()
            .unwrap();

        assert_eq!(found.code, "2222");
        assert_eq!(mailbox.queries, vec!["UNSEEN SINCE 18-Oct-2026".to_string()]);
    }

    #[test]
    fn test_scan_falls_back_to_all_unread() {
        let message = mail("Your OTP 7734", "Sun, 18 Oct 2026 09:58:00 +0000");
        let mut mailbox = FakeMailbox::new(vec![(1, message.as_str())]);
        mailbox.dated_search_fails = true;

        let found = scan_mailbox(&mut mailbox, Duration::from_secs(600), 10, now()).unwrap();

        assert_eq!(found.map(|m| m.code), Some("7734".to_string()));
        assert_eq!(mailbox.queries.len(), 2);
        assert_eq!(mailbox.queries[1], "UNSEEN");
    }

    #[test]
    fn test_scan_limits_to_newest_messages() {
        let message = mail("Your OTP 7734", "Sun, 18 Oct 2026 09:58:00 +0000");
        let messages: Vec<(u32, &str)> = (1..=15).map(|seq| (seq, message.as_str())).collect();
        let mut mailbox = FakeMailbox::new(messages);

        scan_mailbox(&mut mailbox, Duration::from_secs(600), 10, now()).unwrap();

        assert_eq!(mailbox.fetched, (6..=15).rev().collect::<Vec<u32>>());
    }

    #[test]
    fn test_scan_without_unread_mail() {
        let mut mailbox = FakeMailbox::new(vec![]);
        let found = scan_mailbox(&mut mailbox, Duration::from_secs(600), 10, now()).unwrap();
        assert_eq!(found, None);
        assert!(mailbox.fetched.is_empty());
    }

    #[test]
    fn test_connect_to_silent_server_times_out() {
        // Accepted by the backlog but never answered
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = MailboxConfig::gmail("qa@example.com", "secret");
        config.host = "127.0.0.1".to_string();
        config.port = listener.local_addr().unwrap().port();
        config.io_timeout = Duration::from_millis(200);

        let started = std::time::Instant::now();
        let result = ImapMailbox::connect(&config);

        assert!(matches!(result, Err(OtpError::Connection(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_scan_without_codes() {
        let message = mail("Weekly offers", "Sun, 18 Oct 2026 09:58:00 +0000");
        let mut mailbox = FakeMailbox::new(vec![(3, message.as_str())]);
        let found = scan_mailbox(&mut mailbox, Duration::from_secs(600), 10, now()).unwrap();
        assert_eq!(found, None);
    }
}
