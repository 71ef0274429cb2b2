use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to connect to Chrome: {0}")]
    ConnectionFailed(String),

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    #[error("No page available")]
    NoPage,

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Failures of a journey step after its action policy has been applied.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("{action}: all {attempted} candidate(s) failed, last error: {last_error}")]
    AllCandidatesFailed {
        action: String,
        attempted: usize,
        last_error: String,
    },

    #[error("No option available among {0} preference(s)")]
    NoOptionAvailable(usize),

    #[error("Timed out after {millis}ms waiting for {what}")]
    Timeout { what: String, millis: u64 },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Variable ${{{0}}} is not defined")]
    MissingVariable(String),

    #[error("OTP unavailable: {0}")]
    OtpUnavailable(String),

    #[error("Invalid flow: {0}")]
    Invalid(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

impl FlowError {
    /// Short machine-readable category stored alongside failed steps
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::AllCandidatesFailed { .. } => "all_candidates_failed",
            FlowError::NoOptionAvailable(_) => "no_option_available",
            FlowError::Timeout { .. } => "timeout",
            FlowError::Assertion(_) => "assertion",
            FlowError::MissingVariable(_) => "missing_variable",
            FlowError::OtpUnavailable(_) => "otp_unavailable",
            FlowError::Invalid(_) => "invalid_flow",
            FlowError::Browser(_) => "browser",
        }
    }
}

#[derive(Error, Debug)]
pub enum OtpError {
    #[error("IMAP connection failed: {0}")]
    Connection(String),

    #[error("IMAP login failed for {0}")]
    Login(String),

    #[error("IMAP command failed: {0}")]
    Command(String),

    #[error("Mailbox worker failed: {0}")]
    Worker(String),

    #[error("Mailbox scan gave no answer within {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Request to {path} failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Invalid datastore configuration: {0}")]
    Config(String),

    #[error("Realtime channel error: {0}")]
    Realtime(String),
}

impl StoreError {
    /// The view or RPC function does not exist in this database
    pub fn is_missing_relation(&self) -> bool {
        match self {
            StoreError::Status { status: 404, .. } => true,
            // undefined function / undefined table, reported with a 400 by older PostgREST
            StoreError::Status { body, .. } => {
                body.contains("PGRST202") || body.contains("42883") || body.contains("42P01")
            }
            _ => false,
        }
    }
}
