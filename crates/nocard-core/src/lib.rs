pub mod analyzer;
mod clock;
mod error;
mod event;
pub mod event_log;
pub mod login;
mod monitor;
pub mod rate_limit;
pub mod reporting;
pub mod storage;
mod validation;

pub use analyzer::{AnalyzerRules, Finding, Rule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorBody, FailureKind, NoCardError, StorageError, DEFAULT_MAX_DIGITS};
pub use event::{Anomaly, EventDetails, EventType, NewEvent, RiskLevel, SecurityEvent};
pub use event_log::{SecurityStats, DEFAULT_QUERY_LIMIT, DEFAULT_RETENTION};
pub use login::{LoginPolicy, LoginStatus};
pub use monitor::{MonitorOptions, SecurityMonitor, DEFAULT_DEVICE};
pub use rate_limit::{RateLimitCounter, RateLimiter};
pub use reporting::{DashboardSnapshot, ExportRow};
pub use storage::{JsonFileStore, MemoryStore, PersistedState, SecurityStore};
pub use validation::{validate_amount, validate_amount_with};
