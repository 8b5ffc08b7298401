//! Account lockout derived from recorded login attempts.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::NoCardError;
use crate::event::{EventDetails, EventType, NewEvent, RiskLevel, SecurityEvent};
use crate::monitor::SecurityMonitor;

pub const LOGIN_ACTION: &str = "LOGIN";
pub const LOGOUT_ACTION: &str = "LOGOUT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPolicy {
    pub max_failed_attempts: u32,
    /// Both the window failures are counted in and the block length after
    /// the last failure.
    pub lockout_ms: u64,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 3,
            lockout_ms: 30 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStatus {
    pub failed_attempts: u32,
    pub attempts_remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_for_secs: Option<u64>,
}

impl LoginStatus {
    pub fn is_blocked(&self) -> bool {
        self.blocked_for_secs.is_some()
    }
}

impl SecurityMonitor {
    pub fn login_status(&self, subject: &str) -> LoginStatus {
        let policy = &self.options().login;
        let now = self.now_ms();

        let (failed_attempts, last_failure) = {
            let log = self.read_log();
            log.events()
                .iter()
                .filter(|event| {
                    event.subject.as_deref() == Some(subject)
                        && event.kind == EventType::LoginAttempt
                        && event.details.login_success() == Some(false)
                        && now.saturating_sub(event.timestamp) < policy.lockout_ms
                })
                .fold((0_u32, None), |(count, last), event| {
                    (count + 1, last.max(Some(event.timestamp)))
                })
        };

        let blocked_for_secs = match last_failure {
            Some(last) if failed_attempts >= policy.max_failed_attempts => {
                let block_end = last.saturating_add(policy.lockout_ms);
                (block_end > now).then(|| (block_end - now).div_ceil(1_000))
            }
            _ => None,
        };

        LoginStatus {
            failed_attempts,
            attempts_remaining: policy.max_failed_attempts.saturating_sub(failed_attempts),
            blocked_for_secs,
        }
    }

    pub fn ensure_login_allowed(&self, subject: &str) -> Result<(), NoCardError> {
        match self.login_status(subject).blocked_for_secs {
            Some(remaining_secs) => {
                Err(NoCardError::user_blocked_on(self.clock(), remaining_secs))
            }
            None => Ok(()),
        }
    }

    /// Records the outcome of a credential check for `subject`.
    ///
    /// Blocked subjects are refused without recording anything. A failure is
    /// recorded and then reported as `UserBlocked` when it completes the
    /// lockout, or `InvalidCredentials` with the attempts left.
    pub fn record_login(
        &self,
        subject: &str,
        device: Option<&str>,
        success: bool,
    ) -> Result<SecurityEvent, NoCardError> {
        self.ensure_login_allowed(subject)?;

        let risk = if success {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        };
        let mut new_event = NewEvent::new(
            EventType::LoginAttempt,
            EventDetails::login(LOGIN_ACTION, success),
        )
        .subject(subject)
        .risk(risk);
        new_event.device_info = device.map(ToString::to_string);
        let event = self.append(new_event);
        if success {
            return Ok(event);
        }

        let status = self.login_status(subject);
        info!(
            subject,
            failed_attempts = status.failed_attempts,
            blocked = status.is_blocked(),
            "login failed"
        );
        match status.blocked_for_secs {
            Some(remaining_secs) => {
                Err(NoCardError::user_blocked_on(self.clock(), remaining_secs))
            }
            None => Err(NoCardError::invalid_credentials_on(
                self.clock(),
                status.attempts_remaining,
            )),
        }
    }

    pub fn record_logout(&self, subject: &str) -> SecurityEvent {
        self.log_event(
            EventType::LoginAttempt,
            EventDetails::login(LOGOUT_ACTION, true),
            Some(subject),
            RiskLevel::Low,
        )
    }
}
