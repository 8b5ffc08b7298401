//! Read-only views over a [`SecurityMonitor`] for dashboards and exports.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::{EventType, RiskLevel, SecurityEvent};
use crate::event_log::SecurityStats;
use crate::monitor::SecurityMonitor;

pub const DEFAULT_STATS_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_DASHBOARD_LIMIT: usize = 50;

const ANONYMOUS: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub stats: SecurityStats,
    pub recent: Vec<SecurityEvent>,
    /// Set while the monitor cannot write to its store.
    pub degraded: bool,
}

pub fn dashboard(
    monitor: &SecurityMonitor,
    subject: Option<&str>,
    limit: usize,
) -> DashboardSnapshot {
    DashboardSnapshot {
        stats: monitor.stats(DEFAULT_STATS_LOOKBACK),
        recent: monitor.query(subject, limit),
        degraded: monitor.is_degraded(),
    }
}

/// One flattened event as shown in the admin security report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub id: String,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub user_id: String,
    pub risk_level: RiskLevel,
    /// Details as compact JSON.
    pub details: String,
}

impl ExportRow {
    pub fn from_event(event: &SecurityEvent) -> Self {
        Self {
            id: event.id.clone(),
            timestamp: event.timestamp,
            kind: event.kind,
            user_id: event
                .subject
                .clone()
                .unwrap_or_else(|| ANONYMOUS.to_string()),
            risk_level: event.risk_level,
            details: serde_json::to_string(&event.details).unwrap_or_default(),
        }
    }
}

/// Export rows for the newest `limit` events, newest first.
pub fn export(monitor: &SecurityMonitor, limit: usize) -> Vec<ExportRow> {
    monitor
        .query(None, limit)
        .iter()
        .map(ExportRow::from_event)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{dashboard, export};
    use crate::clock::ManualClock;
    use crate::event::{EventDetails, EventType, RiskLevel};
    use crate::monitor::{MonitorOptions, SecurityMonitor};
    use crate::storage::MemoryStore;

    fn monitor() -> SecurityMonitor {
        SecurityMonitor::open(
            MonitorOptions::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::starting_at(5_000)),
        )
    }

    #[test]
    fn dashboard_combines_stats_and_recent_events() {
        let monitor = monitor();
        monitor.log_event(
            EventType::PaymentAttempt,
            EventDetails::activity("PAY"),
            Some("ana"),
            RiskLevel::Low,
        );
        monitor.log_event(
            EventType::LoginAttempt,
            EventDetails::login("LOGIN", true),
            Some("bia"),
            RiskLevel::Low,
        );

        let snapshot = dashboard(&monitor, Some("ana"), 10);
        assert_eq!(snapshot.stats.total_events, 2);
        assert_eq!(snapshot.recent.len(), 1);
        assert_eq!(snapshot.recent[0].subject.as_deref(), Some("ana"));
        assert!(!snapshot.degraded);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["stats"]["totalEvents"], 2);
    }

    #[test]
    fn export_flattens_events_newest_first() {
        let monitor = monitor();
        monitor.log_event(
            EventType::LoginAttempt,
            EventDetails::login("LOGIN", false),
            None,
            RiskLevel::Medium,
        );

        monitor.log_event(
            EventType::PaymentAttempt,
            EventDetails::activity("PAY"),
            Some("ana"),
            RiskLevel::Low,
        );

        let rows = export(&monitor, 10);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_id, "ana");
        assert_eq!(rows[1].user_id, "N/A");
        assert_eq!(rows[1].timestamp, 5_000);
        assert_eq!(rows[1].risk_level, RiskLevel::Medium);
        assert_eq!(
            rows[1].details,
            r#"{"kind":"login","action":"LOGIN","success":false}"#
        );

        assert_eq!(export(&monitor, 1).len(), 1);
    }
}
