use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

pub const DEFAULT_MAX_DIGITS: usize = 16;

/// The closed set of failures surfaced to login and payment flows.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureKind {
    #[error("user blocked, retry in {} minutes", .remaining_secs.div_ceil(60))]
    UserBlocked { remaining_secs: u64 },

    #[error("invalid credentials, {attempts_remaining} attempts remaining")]
    InvalidCredentials { attempts_remaining: u32 },

    #[error("value exceeds {max_digits}-digit precision: {value}")]
    TransactionPrecision { value: String, max_digits: usize },

    #[error("user not found: {identifier}")]
    UserNotFound { identifier: String },

    #[error("insufficient funds, requested {requested}, available {available}")]
    InsufficientFunds { requested: f64, available: f64 },

    #[error("suspicious activity detected: {activity}")]
    SuspiciousActivity {
        activity: String,
        details: Map<String, Value>,
    },

    #[error("rate limit exceeded for {action}, retry in {retry_after_secs} seconds")]
    RateLimitExceeded {
        action: String,
        reset_at_ms: u64,
        retry_after_secs: u64,
    },

    #[error("invalid amount: {value}")]
    InvalidAmount { value: String },
}

impl FailureKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserBlocked { .. } => "USER_BLOCKED",
            Self::InvalidCredentials { .. } => "INVALID_CREDENTIALS",
            Self::TransactionPrecision { .. } => "TRANSACTION_PRECISION_ERROR",
            Self::UserNotFound { .. } => "USER_NOT_FOUND",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::SuspiciousActivity { .. } => "SUSPICIOUS_ACTIVITY",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
        }
    }
}

/// A signaled failure: one [`FailureKind`] plus the instant it was raised.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct NoCardError {
    kind: FailureKind,
    timestamp_ms: u64,
}

/// Wire shape of a [`NoCardError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub timestamp: u64,
    pub details: Value,
}

impl NoCardError {
    fn stamped(kind: FailureKind, clock: &dyn Clock) -> Self {
        Self {
            kind,
            timestamp_ms: clock.now_ms(),
        }
    }

    fn new(kind: FailureKind) -> Self {
        Self::stamped(kind, &SystemClock)
    }

    pub fn user_blocked(remaining_secs: u64) -> Self {
        Self::user_blocked_on(&SystemClock, remaining_secs)
    }

    pub fn user_blocked_on(clock: &dyn Clock, remaining_secs: u64) -> Self {
        Self::stamped(FailureKind::UserBlocked { remaining_secs }, clock)
    }

    pub fn invalid_credentials(attempts_remaining: u32) -> Self {
        Self::invalid_credentials_on(&SystemClock, attempts_remaining)
    }

    pub fn invalid_credentials_on(clock: &dyn Clock, attempts_remaining: u32) -> Self {
        Self::stamped(FailureKind::InvalidCredentials { attempts_remaining }, clock)
    }

    pub fn transaction_precision(value: impl Into<String>) -> Self {
        Self::transaction_precision_with(value, DEFAULT_MAX_DIGITS)
    }

    pub fn transaction_precision_with(value: impl Into<String>, max_digits: usize) -> Self {
        Self::new(FailureKind::TransactionPrecision {
            value: value.into(),
            max_digits,
        })
    }

    pub fn user_not_found(identifier: impl Into<String>) -> Self {
        Self::new(FailureKind::UserNotFound {
            identifier: identifier.into(),
        })
    }

    pub fn insufficient_funds(requested: f64, available: f64) -> Self {
        Self::new(FailureKind::InsufficientFunds {
            requested,
            available,
        })
    }

    pub fn suspicious_activity(activity: impl Into<String>, details: Map<String, Value>) -> Self {
        Self::new(FailureKind::SuspiciousActivity {
            activity: activity.into(),
            details,
        })
    }

    pub fn rate_limit_exceeded(action: impl Into<String>, reset_at_ms: u64) -> Self {
        Self::rate_limit_exceeded_on(&SystemClock, action, reset_at_ms)
    }

    /// Same as [`NoCardError::rate_limit_exceeded`], reading "now" from `clock`
    /// so the retry hint agrees with the limiter's own notion of time.
    pub fn rate_limit_exceeded_on(
        clock: &dyn Clock,
        action: impl Into<String>,
        reset_at_ms: u64,
    ) -> Self {
        let now = clock.now_ms();
        let retry_after_secs = reset_at_ms.saturating_sub(now).div_ceil(1_000);
        Self::stamped(
            FailureKind::RateLimitExceeded {
                action: action.into(),
                reset_at_ms,
                retry_after_secs,
            },
            clock,
        )
    }

    pub fn invalid_amount(value: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidAmount {
            value: value.into(),
        })
    }

    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Policy failures are shown to the user as-is; the rest are input
    /// validation failures for the immediate caller.
    pub fn is_policy_failure(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::UserBlocked { .. }
                | FailureKind::InvalidCredentials { .. }
                | FailureKind::InsufficientFunds { .. }
                | FailureKind::SuspiciousActivity { .. }
                | FailureKind::RateLimitExceeded { .. }
        )
    }

    pub fn details(&self) -> Value {
        match &self.kind {
            FailureKind::UserBlocked { remaining_secs } => {
                json!({ "blockTimeRemaining": remaining_secs })
            }
            FailureKind::InvalidCredentials { attempts_remaining } => {
                json!({ "attemptsRemaining": attempts_remaining })
            }
            FailureKind::TransactionPrecision { value, max_digits } => {
                json!({ "value": value, "maxDigits": max_digits })
            }
            FailureKind::UserNotFound { identifier } => json!({ "identifier": identifier }),
            FailureKind::InsufficientFunds {
                requested,
                available,
            } => json!({ "requestedAmount": requested, "availableBalance": available }),
            FailureKind::SuspiciousActivity { activity, details } => {
                let mut merged = details.clone();
                merged.insert("activityType".to_string(), json!(activity));
                Value::Object(merged)
            }
            FailureKind::RateLimitExceeded {
                action,
                reset_at_ms,
                ..
            } => json!({ "action": action, "resetTime": reset_at_ms }),
            FailureKind::InvalidAmount { value } => json!({ "value": value }),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            timestamp: self.timestamp_ms,
            details: self.details(),
        }
    }
}

/// Failures of the persistence boundary. These never leave the monitor.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage json error: {0}")]
    Json(#[from] serde_json::Error),
}
