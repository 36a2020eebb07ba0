//! Per-agent session state and config loading.
//!
//! One `SessionState` exists per agent session (per dashboard tab). It owns
//! every piece of mutable reconciliation state: the known-id set, the
//! processed set, the latest unified record set, the refresh throttle stamp,
//! and the extraction batch epoch. Keeping these on an explicit session
//! object rather than ambient globals makes concurrent agent sessions safe
//! by construction.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::detector::KnownCalls;
use crate::types::{CallRecord, Config};

/// Mutable state for one agent's reconciliation session.
pub struct SessionState {
    pub agent_id: String,
    known: Mutex<KnownCalls>,
    processed: Mutex<HashSet<String>>,
    records: Mutex<Vec<CallRecord>>,
    last_refresh: Mutex<Option<Instant>>,
    batch_epoch: AtomicU64,
}

impl SessionState {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            known: Mutex::new(KnownCalls::new()),
            processed: Mutex::new(HashSet::new()),
            records: Mutex::new(Vec::new()),
            last_refresh: Mutex::new(None),
            batch_epoch: AtomicU64::new(0),
        }
    }

    /// Throttle gate for refresh passes. Returns false (a no-op for the
    /// caller, nothing is queued) when the previous attempt was less than
    /// `min_interval` ago; otherwise stamps the attempt and returns true.
    pub fn try_begin_refresh(&self, min_interval: Duration) -> bool {
        let mut guard = match self.last_refresh.lock() {
            Ok(g) => g,
            Err(_) => return false,
        };

        if let Some(last) = *guard {
            if last.elapsed() < min_interval {
                return false;
            }
        }

        *guard = Some(Instant::now());
        true
    }

    /// Classify the current id set against the known set, then replace the
    /// known set. Returns the ids considered new (empty on the seeding
    /// pass).
    pub fn observe_calls(&self, current: &HashSet<String>) -> HashSet<String> {
        let mut known = match self.known.lock() {
            Ok(g) => g,
            Err(_) => return HashSet::new(),
        };
        let fresh = known.detect_new(current);
        known.update(current.clone());
        fresh
    }

    /// Record that extraction has been attempted for a call. Monotonic for
    /// the lifetime of the session.
    pub fn mark_processed(&self, call_id: &str) {
        if let Ok(mut processed) = self.processed.lock() {
            processed.insert(call_id.to_string());
        }
    }

    pub fn is_processed(&self, call_id: &str) -> bool {
        self.processed
            .lock()
            .map(|p| p.contains(call_id))
            .unwrap_or(false)
    }

    /// Stamp `processed` onto a freshly merged record set.
    pub fn apply_processed(&self, records: &mut [CallRecord]) {
        if let Ok(processed) = self.processed.lock() {
            for record in records.iter_mut() {
                record.processed = processed.contains(&record.call_id);
            }
        }
    }

    /// Replace the unified record set the UI renders from.
    pub fn set_records(&self, records: Vec<CallRecord>) {
        if let Ok(mut guard) = self.records.lock() {
            *guard = records;
        }
    }

    /// Snapshot of the current unified record set.
    pub fn records(&self) -> Vec<CallRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Apply an in-place update to one unified record, if present.
    pub fn update_record(&self, call_id: &str, f: impl FnOnce(&mut CallRecord)) {
        if let Ok(mut guard) = self.records.lock() {
            if let Some(record) = guard.iter_mut().find(|r| r.call_id == call_id) {
                f(record);
            }
        }
    }

    /// Start a new extraction batch, superseding any batch still draining.
    pub fn begin_batch(&self) -> u64 {
        self.batch_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The epoch of the most recently started batch.
    pub fn current_batch(&self) -> u64 {
        self.batch_epoch.load(Ordering::SeqCst)
    }
}

/// Get the canonical config file path (`~/.calldesk/config.json`).
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".calldesk").join("config.json"))
}

/// Load configuration from `~/.calldesk/config.json`.
pub fn load_config() -> Result<Config, String> {
    let path = config_path()?;

    if !path.exists() {
        return Err(format!(
            "Config file not found at {}. Create it with at least providerBaseUrl, providerApiKey, and extractionUrl.",
            path.display()
        ));
    }

    let content =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    if config.provider_base_url.is_empty() {
        return Err("providerBaseUrl must not be empty".to_string());
    }
    if config.extraction_url.is_empty() {
        return Err("extractionUrl must not be empty".to_string());
    }

    Ok(config)
}

/// Resolve the overlay database path from config, falling back to the
/// default under `~/.calldesk/`.
pub fn overlay_db_path(config: &Config) -> Option<PathBuf> {
    config.db_path.as_ref().map(PathBuf::from)
}
