//! Execution results: the stored rows, the dashboard computations over them
//! and the datastore access for both the runner and the dashboard.

pub mod analytics;
pub mod dashboard;
pub mod model;
pub mod realtime;
pub mod recorder;
pub mod stats;
pub mod store;

pub use dashboard::{DashboardService, DashboardSnapshot, DashboardSource};
pub use model::{Journey, JourneyStatus, Platform, Step, StepCounts, StepStatus, TestRun};
pub use realtime::{ChangeEvent, ChangeNotification, LiveDashboard, RealtimeListener};
pub use recorder::RunRecorder;
pub use stats::{format_duration, success_rate};
pub use store::SupabaseStore;
