use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;
use crate::event::SecurityEvent;
use crate::rate_limit::RateLimitCounter;

const EVENTS_FILE: &str = "security-events.json";
const RATE_LIMITS_FILE: &str = "rate-limits.json";

/// Everything the monitor keeps across restarts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub events: Vec<SecurityEvent>,
    pub rate_limits: BTreeMap<String, RateLimitCounter>,
}

/// Durable home of the event log and the rate-limit counters. The two
/// collections are written independently and never share keys.
pub trait SecurityStore: Send + Sync {
    fn load(&self) -> Result<PersistedState, StorageError>;
    fn save_events(&self, events: &[SecurityEvent]) -> Result<(), StorageError>;
    fn save_rate_limits(
        &self,
        rate_limits: &BTreeMap<String, RateLimitCounter>,
    ) -> Result<(), StorageError>;
}

/// In-process store. Clones share contents, which lets tests restart a
/// monitor against "the same disk".
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<PersistedState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every load and save fails with an I/O error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PersistedState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "memory store marked unavailable",
            )));
        }
        Ok(())
    }
}

impl SecurityStore for MemoryStore {
    fn load(&self) -> Result<PersistedState, StorageError> {
        self.check_available()?;
        Ok(self.snapshot())
    }

    fn save_events(&self, events: &[SecurityEvent]) -> Result<(), StorageError> {
        self.check_available()?;
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.events = events.to_vec();
        Ok(())
    }

    fn save_rate_limits(
        &self,
        rate_limits: &BTreeMap<String, RateLimitCounter>,
    ) -> Result<(), StorageError> {
        self.check_available()?;
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.rate_limits = rate_limits.clone();
        Ok(())
    }
}

/// Two JSON documents in one directory, each replaced wholesale on save.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_json<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StorageError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let body = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StorageError> {
        let body = serde_json::to_vec(value)?;
        let tmp_path = self.dir.join(format!(".{name}.tmp"));
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&body)?;
        file.sync_all()?;
        fs::rename(&tmp_path, self.dir.join(name))?;
        Ok(())
    }
}

impl SecurityStore for JsonFileStore {
    fn load(&self) -> Result<PersistedState, StorageError> {
        Ok(PersistedState {
            events: self.read_json(EVENTS_FILE)?,
            rate_limits: self.read_json(RATE_LIMITS_FILE)?,
        })
    }

    fn save_events(&self, events: &[SecurityEvent]) -> Result<(), StorageError> {
        self.write_json(EVENTS_FILE, events)
    }

    fn save_rate_limits(
        &self,
        rate_limits: &BTreeMap<String, RateLimitCounter>,
    ) -> Result<(), StorageError> {
        self.write_json(RATE_LIMITS_FILE, rate_limits)
    }
}
