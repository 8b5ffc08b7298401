//! Pattern rules evaluated against a subject's recent events.

use std::collections::HashSet;

use crate::event::{Anomaly, EventType, RiskLevel, SecurityEvent};

pub const DEFAULT_WINDOW_MS: u64 = 30 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    RepeatedFailedLogins,
    PaymentFlooding,
    DeviceFanOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerRules {
    pub window_ms: u64,
    /// Failed logins in the window at which the login rule fires.
    pub failed_login_threshold: usize,
    /// Payment attempts in the window above which the flooding rule fires.
    pub payment_flood_threshold: usize,
    /// Distinct devices in the window above which the fan-out rule fires.
    pub device_fanout_threshold: usize,
}

impl Default for AnalyzerRules {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            failed_login_threshold: 3,
            payment_flood_threshold: 10,
            device_fanout_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub rule: Rule,
    pub anomaly: Anomaly,
    pub risk: RiskLevel,
}

/// Evaluates every rule not in `skip` for `trigger`. `window` is the
/// subject's window snapshot and already contains `trigger`.
pub fn analyze(
    rules: &AnalyzerRules,
    trigger: &SecurityEvent,
    window: &[SecurityEvent],
    skip: &HashSet<Rule>,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    if trigger.subject.is_none() {
        return findings;
    }

    if !skip.contains(&Rule::RepeatedFailedLogins)
        && trigger.kind == EventType::LoginAttempt
        && trigger.details.login_success() == Some(false)
    {
        let count = window
            .iter()
            .filter(|event| {
                event.kind == EventType::LoginAttempt
                    && event.details.login_success() == Some(false)
            })
            .count();
        if count >= rules.failed_login_threshold {
            findings.push(Finding {
                rule: Rule::RepeatedFailedLogins,
                anomaly: Anomaly::MultipleFailedLogins { count },
                risk: RiskLevel::High,
            });
        }
    }

    if !skip.contains(&Rule::PaymentFlooding) && trigger.kind == EventType::PaymentAttempt {
        let count = window
            .iter()
            .filter(|event| event.kind == EventType::PaymentAttempt)
            .count();
        if count > rules.payment_flood_threshold {
            findings.push(Finding {
                rule: Rule::PaymentFlooding,
                anomaly: Anomaly::RapidPaymentAttempts { count },
                risk: RiskLevel::Medium,
            });
        }
    }

    if !skip.contains(&Rule::DeviceFanOut) {
        let device_count = window
            .iter()
            .map(|event| event.device_info.as_str())
            .collect::<HashSet<_>>()
            .len();
        // A repeat device leaves the count unchanged; report each count once.
        let already_reported = window.iter().any(|event| {
            event.details.anomaly() == Some(&Anomaly::MultipleDevices { device_count })
        });
        if device_count > rules.device_fanout_threshold && !already_reported {
            findings.push(Finding {
                rule: Rule::DeviceFanOut,
                anomaly: Anomaly::MultipleDevices { device_count },
                risk: RiskLevel::High,
            });
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::Map;

    use super::{analyze, AnalyzerRules, Rule};
    use crate::event::{Anomaly, EventDetails, EventType, RiskLevel, SecurityEvent};

    fn event(
        kind: EventType,
        details: EventDetails,
        device: &str,
        subject: Option<&str>,
    ) -> SecurityEvent {
        SecurityEvent {
            id: format!("SEC_{device}"),
            timestamp: 0,
            kind,
            subject: subject.map(ToString::to_string),
            device_info: device.to_string(),
            ip_address: None,
            details,
            extensions: Map::new(),
            risk_level: RiskLevel::Low,
        }
    }

    fn failed_login(device: &str) -> SecurityEvent {
        event(
            EventType::LoginAttempt,
            EventDetails::login("LOGIN", false),
            device,
            Some("ana"),
        )
    }

    #[test]
    fn failed_logins_fire_at_threshold() {
        let rules = AnalyzerRules::default();
        let window = vec![failed_login("web"), failed_login("web")];
        assert!(analyze(&rules, &window[1], &window, &HashSet::new()).is_empty());

        let window = vec![failed_login("web"), failed_login("web"), failed_login("web")];
        let findings = analyze(&rules, &window[2], &window, &HashSet::new());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].anomaly, Anomaly::MultipleFailedLogins { count: 3 });
        assert_eq!(findings[0].risk, RiskLevel::High);
    }

    #[test]
    fn successful_login_does_not_trigger_login_rule() {
        let rules = AnalyzerRules::default();
        let mut window = vec![failed_login("web"), failed_login("web"), failed_login("web")];
        window.push(event(
            EventType::LoginAttempt,
            EventDetails::login("LOGIN", true),
            "web",
            Some("ana"),
        ));
        assert!(analyze(&rules, &window[3], &window, &HashSet::new()).is_empty());
    }

    #[test]
    fn malformed_login_payload_detects_nothing() {
        let rules = AnalyzerRules::default();
        let odd = event(
            EventType::LoginAttempt,
            EventDetails::activity("LOGIN"),
            "web",
            Some("ana"),
        );
        let window = vec![failed_login("web"), failed_login("web"), odd.clone()];
        assert!(analyze(&rules, &odd, &window, &HashSet::new()).is_empty());
    }

    #[test]
    fn payment_flooding_needs_more_than_threshold() {
        let rules = AnalyzerRules::default();
        let payment = || {
            event(
                EventType::PaymentAttempt,
                EventDetails::activity("PAY"),
                "web",
                Some("ana"),
            )
        };
        let window: Vec<_> = (0..10).map(|_| payment()).collect();
        assert!(analyze(&rules, &window[9], &window, &HashSet::new()).is_empty());

        let window: Vec<_> = (0..11).map(|_| payment()).collect();
        let findings = analyze(&rules, &window[10], &window, &HashSet::new());
        assert_eq!(findings[0].anomaly, Anomaly::RapidPaymentAttempts { count: 11 });
        assert_eq!(findings[0].risk, RiskLevel::Medium);
    }

    #[test]
    fn device_fan_out_reports_each_count_once() {
        let rules = AnalyzerRules::default();
        let mut window: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|device| failed_login(device))
            .collect();
        let skip = HashSet::from([Rule::RepeatedFailedLogins]);
        let findings = analyze(&rules, &window[3], &window, &skip);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].anomaly, Anomaly::MultipleDevices { device_count: 4 });

        window.push(event(
            EventType::SuspiciousActivity,
            EventDetails::Anomaly(Anomaly::MultipleDevices { device_count: 4 }),
            "d",
            Some("ana"),
        ));
        window.push(failed_login("a"));
        let trigger = window.last().cloned().unwrap();
        assert!(analyze(&rules, &trigger, &window, &skip).is_empty());
    }

    #[test]
    fn skipped_rules_and_anonymous_triggers_are_ignored() {
        let rules = AnalyzerRules::default();
        let window = vec![failed_login("web"), failed_login("web"), failed_login("web")];
        let skip = HashSet::from([Rule::RepeatedFailedLogins]);
        assert!(analyze(&rules, &window[2], &window, &skip).is_empty());

        let anonymous = event(
            EventType::LoginAttempt,
            EventDetails::login("LOGIN", false),
            "web",
            None,
        );
        assert!(analyze(&rules, &anonymous, &window, &HashSet::new()).is_empty());
    }
}
