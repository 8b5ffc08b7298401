use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{EventType, NewEvent, RiskLevel, SecurityEvent};

pub const DEFAULT_RETENTION: usize = 1_000;
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Rolled-up counts over a lookback window. Types and risk levels that did not
/// occur are absent from the maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    pub total_events: usize,
    pub by_type: BTreeMap<EventType, usize>,
    pub by_risk: BTreeMap<RiskLevel, usize>,
}

impl SecurityStats {
    pub fn count_of(&self, kind: EventType) -> usize {
        self.by_type.get(&kind).copied().unwrap_or_default()
    }

    pub fn count_at(&self, risk: RiskLevel) -> usize {
        self.by_risk.get(&risk).copied().unwrap_or_default()
    }
}

/// Insertion-ordered, capped event log. Timestamps never decrease along the
/// log, so insertion order is also time order.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: Vec<SecurityEvent>,
    retention: usize,
}

impl EventLog {
    pub fn new(retention: usize) -> Self {
        Self::from_events(Vec::new(), retention)
    }

    /// Rebuilds a log from persisted events, keeping the newest `retention`.
    pub fn from_events(mut events: Vec<SecurityEvent>, retention: usize) -> Self {
        let retention = retention.max(1);
        events.sort_by_key(|event| event.timestamp);
        let excess = events.len().saturating_sub(retention);
        events.drain(..excess);
        Self { events, retention }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[SecurityEvent] {
        &self.events
    }

    pub fn push(&mut self, new_event: NewEvent, default_device: &str, now: u64) -> SecurityEvent {
        let timestamp = self
            .events
            .last()
            .map_or(now, |last| now.max(last.timestamp));
        let event = SecurityEvent {
            id: format!("SEC_{timestamp}_{}", Uuid::new_v4().simple()),
            timestamp,
            kind: new_event.kind,
            subject: new_event.subject,
            device_info: new_event
                .device_info
                .unwrap_or_else(|| default_device.to_string()),
            ip_address: new_event.ip_address,
            details: new_event.details,
            extensions: new_event.extensions,
            risk_level: new_event.risk_level,
        };

        self.events.push(event.clone());
        if self.events.len() > self.retention {
            let excess = self.events.len() - self.retention;
            self.events.drain(..excess);
        }
        event
    }

    /// Newest first; equal timestamps list the later insertion first.
    pub fn query(&self, subject: Option<&str>, limit: usize) -> Vec<SecurityEvent> {
        let mut matching: Vec<SecurityEvent> = self
            .events
            .iter()
            .rev()
            .filter(|event| subject.is_none() || event.subject.as_deref() == subject)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        matching
    }

    pub fn stats(&self, now: u64, lookback_ms: u64) -> SecurityStats {
        let since = now.saturating_sub(lookback_ms);
        let mut stats = SecurityStats::default();
        for event in self.events.iter().filter(|event| event.timestamp > since) {
            stats.total_events += 1;
            *stats.by_type.entry(event.kind).or_default() += 1;
            *stats.by_risk.entry(event.risk_level).or_default() += 1;
        }
        stats
    }

    /// Events of `subject` younger than `window_ms`, oldest first.
    pub fn window(&self, subject: &str, now: u64, window_ms: u64) -> Vec<SecurityEvent> {
        self.events
            .iter()
            .filter(|event| {
                event.subject.as_deref() == Some(subject)
                    && now.saturating_sub(event.timestamp) < window_ms
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::EventLog;
    use crate::event::{EventDetails, EventType, NewEvent, RiskLevel};

    fn login(subject: &str) -> NewEvent {
        NewEvent::new(EventType::LoginAttempt, EventDetails::login("LOGIN", true)).subject(subject)
    }

    #[test]
    fn stamps_id_timestamp_and_default_device() {
        let mut log = EventLog::new(10);
        let event = log.push(login("ana"), "web", 42);

        assert_eq!(event.timestamp, 42);
        assert!(event.id.starts_with("SEC_42_"));
        assert_eq!(event.device_info, "web");
        assert_eq!(event.risk_level, RiskLevel::Low);

        let other = log.push(login("ana").device("pixel"), "web", 42);
        assert_ne!(other.id, event.id);
        assert_eq!(other.device_info, "pixel");
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let mut log = EventLog::new(10);
        log.push(login("ana"), "web", 1_000);
        let late = log.push(login("ana"), "web", 900);
        assert_eq!(late.timestamp, 1_000);
    }

    #[test]
    fn evicts_oldest_beyond_retention() {
        let mut log = EventLog::new(3);
        let first = log.push(login("ana"), "web", 1);
        for now in 2..=4 {
            log.push(login("ana"), "web", now);
        }
        assert_eq!(log.len(), 3);
        assert!(log.events().iter().all(|event| event.id != first.id));
        assert_eq!(log.events()[0].timestamp, 2);
    }

    #[test]
    fn query_orders_newest_first_and_filters_subject() {
        let mut log = EventLog::new(10);
        let a = log.push(login("ana"), "web", 10);
        let b = log.push(login("bia"), "web", 20);
        let c = log.push(login("ana"), "web", 20);
        let d = log.push(
            NewEvent::new(EventType::PaymentAttempt, EventDetails::activity("x")),
            "web",
            30,
        );

        let all: Vec<_> = log.query(None, 100).into_iter().map(|e| e.id).collect();
        assert_eq!(all, vec![d.id, c.id.clone(), b.id, a.id.clone()]);

        let ana: Vec<_> = log.query(Some("ana"), 100).into_iter().map(|e| e.id).collect();
        assert_eq!(ana, vec![c.id.clone(), a.id]);

        let limited = log.query(Some("ana"), 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, c.id);
    }

    #[test]
    fn stats_exclude_events_outside_lookback() {
        let hour = 60 * 60 * 1_000;
        let now = 48 * hour;
        let mut log = EventLog::new(10);
        log.push(login("ana"), "web", now - 25 * hour);
        log.push(
            NewEvent::new(EventType::PaymentAttempt, EventDetails::activity("pay"))
                .risk(RiskLevel::Medium),
            "web",
            now - hour,
        );

        let stats = log.stats(now, 24 * hour);
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.by_type.len(), 1);
        assert_eq!(stats.count_of(EventType::PaymentAttempt), 1);
        assert_eq!(stats.count_of(EventType::LoginAttempt), 0);
        assert_eq!(stats.count_at(RiskLevel::Medium), 1);
    }

    #[test]
    fn window_is_subject_scoped_and_half_open() {
        let mut log = EventLog::new(10);
        log.push(login("ana"), "web", 0);
        log.push(login("ana"), "web", 1);
        log.push(login("bia"), "web", 5);
        log.push(
            NewEvent::new(EventType::LoginAttempt, EventDetails::login("LOGIN", true)),
            "web",
            5,
        );

        let window = log.window("ana", 1_000, 1_000);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].timestamp, 1);
    }

    #[test]
    fn reload_keeps_newest_within_retention() {
        let mut log = EventLog::new(10);
        for now in 1..=5 {
            log.push(login("ana"), "web", now);
        }
        let reloaded = EventLog::from_events(log.events().to_vec(), 2);
        let stamps: Vec<_> = reloaded.events().iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![4, 5]);
    }
}
