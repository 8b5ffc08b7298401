use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    LoginAttempt,
    PaymentAttempt,
    SuspiciousActivity,
    RateLimitHit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginAttempt => "LOGIN_ATTEMPT",
            Self::PaymentAttempt => "PAYMENT_ATTEMPT",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            Self::RateLimitHit => "RATE_LIMIT_HIT",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Pattern reported by a derived `SUSPICIOUS_ACTIVITY` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Anomaly {
    MultipleFailedLogins {
        count: usize,
    },
    RapidPaymentAttempts {
        count: usize,
    },
    MultipleDevices {
        #[serde(rename = "deviceCount")]
        device_count: usize,
    },
}

/// Typed payload of a [`SecurityEvent`]. Anything else a caller wants to keep
/// goes in [`SecurityEvent::extensions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetails {
    Login {
        action: String,
        success: bool,
    },
    Payment {
        #[serde(
            default,
            rename = "transactionId",
            skip_serializing_if = "Option::is_none"
        )]
        transaction_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
    },
    Anomaly(Anomaly),
    Activity {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enabled: Option<bool>,
    },
    RateLimit {
        action: String,
        limit: u32,
        #[serde(rename = "currentCount")]
        current_count: u32,
    },
}

impl EventDetails {
    pub fn login(action: impl Into<String>, success: bool) -> Self {
        Self::Login {
            action: action.into(),
            success,
        }
    }

    pub fn activity(action: impl Into<String>) -> Self {
        Self::Activity {
            action: action.into(),
            enabled: None,
        }
    }

    /// `Some(false)` only for a login payload that reports failure.
    pub fn login_success(&self) -> Option<bool> {
        match self {
            Self::Login { success, .. } => Some(*success),
            _ => None,
        }
    }

    pub fn anomaly(&self) -> Option<&Anomaly> {
        match self {
            Self::Anomaly(anomaly) => Some(anomaly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub device_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub details: EventDetails,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
    pub risk_level: RiskLevel,
}

/// Caller-side description of an event; the store adds id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub details: EventDetails,
    #[serde(default, rename = "userId")]
    pub subject: Option<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub device_info: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

impl NewEvent {
    pub fn new(kind: EventType, details: EventDetails) -> Self {
        Self {
            kind,
            details,
            subject: None,
            risk_level: RiskLevel::Low,
            device_info: None,
            ip_address: None,
            extensions: Map::new(),
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn device(mut self, device_info: impl Into<String>) -> Self {
        self.device_info = Some(device_info.into());
        self
    }

    pub fn ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Anomaly, EventDetails, EventType, RiskLevel, SecurityEvent};
    use serde_json::{json, Map};

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn serializes_with_camel_case_field_names() {
        let event = SecurityEvent {
            id: "SEC_1_abc".to_string(),
            timestamp: 1,
            kind: EventType::SuspiciousActivity,
            subject: Some("ana".to_string()),
            device_info: "pixel".to_string(),
            ip_address: None,
            details: EventDetails::Anomaly(Anomaly::MultipleDevices { device_count: 4 }),
            extensions: Map::new(),
            risk_level: RiskLevel::High,
        };

        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["type"], "SUSPICIOUS_ACTIVITY");
        assert_eq!(value["userId"], "ana");
        assert_eq!(value["riskLevel"], "HIGH");
        assert_eq!(
            value["details"],
            json!({ "kind": "anomaly", "pattern": "MULTIPLE_DEVICES", "deviceCount": 4 })
        );

        let decoded: SecurityEvent =
            serde_json::from_value(value).expect("event should deserialize");
        assert_eq!(decoded, event);
    }

    #[test]
    fn only_login_payloads_report_success() {
        assert_eq!(
            EventDetails::login("LOGIN", false).login_success(),
            Some(false)
        );
        assert_eq!(EventDetails::activity("NFC_TOGGLE").login_success(), None);
    }

    #[test]
    fn rejects_unknown_detail_kinds() {
        let raw = json!({ "kind": "card_skimmed", "action": "x" });
        assert!(serde_json::from_value::<EventDetails>(raw).is_err());
    }
}
