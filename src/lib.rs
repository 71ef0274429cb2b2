pub mod artifacts;
pub mod browser;
pub mod config;
pub mod error;
pub mod flow;
pub mod otp;
pub mod reporting;
pub mod server;

//  Re-export commonly used items
pub use browser::{ChromeDriver, ConnectionMode, Locator, PageDriver};
pub use config::{ExecutorOptions, MailboxConfig, StoreConfig};
pub use error::{BrowserError, FlowError, OtpError, StoreError};
pub use flow::{
    ActionPolicy, Flow, FlowExecutor, FlowStep, FlowValidator, JourneyReport, MetricsCollector,
    StepOutcome, StepRegistry, UiAction,
};
pub use otp::{GmailOtpClient, OtpProvider};
pub use reporting::{
    DashboardService, DashboardSnapshot, LiveDashboard, Platform, RunRecorder, SupabaseStore,
};
