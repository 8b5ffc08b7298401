use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::analyzer::{self, AnalyzerRules};
use crate::clock::{duration_ms, Clock, SystemClock};
use crate::error::{NoCardError, StorageError};
use crate::event::{EventDetails, EventType, NewEvent, RiskLevel, SecurityEvent};
use crate::event_log::{EventLog, SecurityStats, DEFAULT_RETENTION};
use crate::login::LoginPolicy;
use crate::rate_limit::{RateDecision, RateLimitCounter, RateLimiter};
use crate::storage::{MemoryStore, PersistedState, SecurityStore};

pub const DEFAULT_DEVICE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Maximum number of events kept in memory and on disk.
    pub retention: usize,
    pub rules: AnalyzerRules,
    pub login: LoginPolicy,
    /// Recorded as `deviceInfo` when a caller does not describe its client.
    pub default_device: String,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            rules: AnalyzerRules::default(),
            login: LoginPolicy::default(),
            default_device: DEFAULT_DEVICE.to_string(),
        }
    }
}

/// Handle to the process-wide security state. Clones share the same event log
/// and rate-limit counters.
#[derive(Clone)]
pub struct SecurityMonitor {
    inner: Arc<Shared>,
}

struct Shared {
    options: MonitorOptions,
    clock: Arc<dyn Clock>,
    store: Arc<dyn SecurityStore>,
    log: RwLock<EventLog>,
    /// Held for a whole `append`, outside `log`, so each derived finding is
    /// checked against every finding appended before it.
    analysis: Mutex<()>,
    limiter: Mutex<RateLimiter>,
    degraded: AtomicBool,
}

impl SecurityMonitor {
    /// Loads persisted state from `store`. An unreadable store is logged and
    /// the monitor starts empty in degraded mode.
    pub fn open(
        options: MonitorOptions,
        store: Arc<dyn SecurityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, degraded) = match store.load() {
            Ok(state) => (state, false),
            Err(err) => {
                warn!(error = %err, "failed to load security state, starting empty");
                (PersistedState::default(), true)
            }
        };
        let log = EventLog::from_events(state.events, options.retention);
        info!(
            events = log.len(),
            rate_limits = state.rate_limits.len(),
            retention = options.retention,
            "security monitor ready"
        );

        Self {
            inner: Arc::new(Shared {
                options,
                clock,
                store,
                log: RwLock::new(log),
                analysis: Mutex::new(()),
                limiter: Mutex::new(RateLimiter::from_counters(state.rate_limits)),
                degraded: AtomicBool::new(degraded),
            }),
        }
    }

    pub fn in_memory(options: MonitorOptions) -> Self {
        Self::open(options, Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.inner.options
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// True while the last write to the store failed. The in-memory state
    /// stays authoritative either way.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    pub fn event_count(&self) -> usize {
        self.read_log().len()
    }

    /// Appends and persists `new_event`, then runs pattern analysis on it.
    ///
    /// Each stored event comes back with its subject's window, snapshotted
    /// under the same write lock. Appends are serialized end to end, so a
    /// concurrent caller never analyses a window that lacks an earlier
    /// caller's findings. Derived `SUSPICIOUS_ACTIVITY` events go through the
    /// same path and are analysed in turn, except that a rule fires at most
    /// once per call.
    pub fn append(&self, new_event: NewEvent) -> SecurityEvent {
        let _analysis = self
            .inner
            .analysis
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stored = self.store_event(new_event);
        let event = stored.0.clone();

        let mut fired = HashSet::new();
        let mut pending = VecDeque::from([stored]);
        while let Some((trigger, window)) = pending.pop_front() {
            let Some(subject) = trigger.subject.as_deref() else {
                continue;
            };
            let findings = analyzer::analyze(&self.inner.options.rules, &trigger, &window, &fired);

            for finding in findings {
                fired.insert(finding.rule);
                info!(
                    subject,
                    pattern = ?finding.anomaly,
                    risk = ?finding.risk,
                    "suspicious pattern detected"
                );
                let mut derived = NewEvent::new(
                    EventType::SuspiciousActivity,
                    EventDetails::Anomaly(finding.anomaly),
                )
                .subject(subject)
                .risk(finding.risk)
                .device(trigger.device_info.clone());
                derived.ip_address = trigger.ip_address.clone();
                pending.push_back(self.store_event(derived));
            }
        }

        event
    }

    pub fn log_event(
        &self,
        kind: EventType,
        details: EventDetails,
        subject: Option<&str>,
        risk: RiskLevel,
    ) -> SecurityEvent {
        let mut new_event = NewEvent::new(kind, details).risk(risk);
        new_event.subject = subject.map(ToString::to_string);
        self.append(new_event)
    }

    pub fn query(&self, subject: Option<&str>, limit: usize) -> Vec<SecurityEvent> {
        self.read_log().query(subject, limit)
    }

    pub fn stats(&self, lookback: Duration) -> SecurityStats {
        self.read_log().stats(self.now_ms(), duration_ms(lookback))
    }

    /// Fixed-window admission check for `action` by `subject`.
    ///
    /// A refusal is recorded as a `RATE_LIMIT_HIT` event before the error is
    /// returned.
    pub fn check_and_consume(
        &self,
        action: &str,
        subject: &str,
        limit: u32,
        window: Duration,
    ) -> Result<(), NoCardError> {
        let now = self.now_ms();
        let decision = {
            let mut limiter = self
                .inner
                .limiter
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let decision = limiter.consume(action, subject, limit, duration_ms(window), now);
            if let RateDecision::Admitted { .. } = decision {
                self.record_persistence(self.inner.store.save_rate_limits(&limiter.persisted()));
            }
            decision
        };

        match decision {
            RateDecision::Admitted { count } => {
                debug!(action, subject, count, limit, "rate limit admitted");
                Ok(())
            }
            RateDecision::Exceeded { count, window_end } => {
                warn!(action, subject, count, limit, "rate limit exceeded");
                self.append(
                    NewEvent::new(
                        EventType::RateLimitHit,
                        EventDetails::RateLimit {
                            action: action.to_string(),
                            limit,
                            current_count: count,
                        },
                    )
                    .subject(subject)
                    .risk(RiskLevel::Medium),
                );
                Err(NoCardError::rate_limit_exceeded_on(
                    self.clock(),
                    action,
                    window_end,
                ))
            }
        }
    }

    pub fn rate_limit(&self, action: &str, subject: &str) -> Option<RateLimitCounter> {
        self.inner
            .limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counter(action, subject)
            .cloned()
    }

    /// Stores one event and returns it with the analysis window of its
    /// subject, both taken under the log's write lock.
    fn store_event(&self, new_event: NewEvent) -> (SecurityEvent, Vec<SecurityEvent>) {
        let now = self.now_ms();
        let mut log = self
            .inner
            .log
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let event = log.push(new_event, &self.inner.options.default_device, now);
        self.record_persistence(self.inner.store.save_events(log.events()));
        let window = match event.subject.as_deref() {
            Some(subject) => log.window(subject, now, self.inner.options.rules.window_ms),
            None => Vec::new(),
        };
        debug!(
            id = %event.id,
            kind = event.kind.as_str(),
            risk = ?event.risk_level,
            "security event appended"
        );
        (event, window)
    }

    fn record_persistence(&self, result: Result<(), StorageError>) {
        match result {
            Ok(()) => {
                if self.inner.degraded.swap(false, Ordering::SeqCst) {
                    info!("security store writable again");
                }
            }
            Err(err) => {
                self.inner.degraded.store(true, Ordering::SeqCst);
                warn!(error = %err, "failed to persist security state, keeping it in memory");
            }
        }
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub(crate) fn read_log(&self) -> RwLockReadGuard<'_, EventLog> {
        self.inner
            .log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
