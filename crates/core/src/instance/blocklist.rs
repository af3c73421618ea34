//! Sliding-window strike list keyed by input content hash.
//!
//! Each remote job failure records a strike for the input's content hash.
//! A hash with [`DEFAULT_STRIKE_THRESHOLD`] strikes inside the window is
//! refused before any upload is attempted.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::store::{load_json, save_json, StateStore, BLOCKLIST_KEY};

/// Strikes needed within the window to block a hash.
pub const DEFAULT_STRIKE_THRESHOLD: usize = 3;

/// Length of the strike window.
pub fn default_strike_window() -> Duration {
    Duration::hours(1)
}

type Records = HashMap<String, Vec<DateTime<Utc>>>;

/// Strike status for a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrikeStatus {
    pub strikes: usize,
    pub blocked: bool,
}

/// Per-hash failure timestamps, optionally persisted.
///
/// The lock is never held across an await, so a check and its update
/// cannot interleave with another job's.
pub struct Blocklist {
    records: Mutex<Records>,
    store: Option<Arc<dyn StateStore>>,
    window: Duration,
    threshold: usize,
}

impl Blocklist {
    /// Create an in-memory blocklist with the default window and threshold.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            store: None,
            window: default_strike_window(),
            threshold: DEFAULT_STRIKE_THRESHOLD,
        }
    }

    /// Create a blocklist restored from and saved to `store`.
    pub fn with_store(store: Arc<dyn StateStore>) -> Self {
        let records = match load_json::<Records>(store.as_ref(), BLOCKLIST_KEY) {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load blocked hashes, starting empty: {}", e);
                HashMap::new()
            }
        };
        Self {
            records: Mutex::new(records),
            store: Some(store),
            window: default_strike_window(),
            threshold: DEFAULT_STRIKE_THRESHOLD,
        }
    }

    /// Overrides the window and threshold.
    pub fn with_limits(mut self, window: Duration, threshold: usize) -> Self {
        self.window = window;
        self.threshold = threshold;
        self
    }

    /// Whether `hash` is currently blocked.
    pub fn is_blocked(&self, hash: &str) -> bool {
        self.check_at(hash, Utc::now()).blocked
    }

    /// Prunes strikes outside the window as of `now` and reports the rest.
    ///
    /// Hashes left with no strikes are removed.
    pub fn check_at(&self, hash: &str, now: DateTime<Utc>) -> StrikeStatus {
        let Ok(mut records) = self.records.lock() else {
            return StrikeStatus {
                strikes: 0,
                blocked: false,
            };
        };

        let strikes = match records.get_mut(hash) {
            Some(dates) => {
                dates.retain(|date| now.signed_duration_since(*date) < self.window);
                dates.len()
            }
            None => 0,
        };
        if strikes == 0 {
            records.remove(hash);
        }
        self.persist(&records);

        StrikeStatus {
            strikes,
            blocked: strikes >= self.threshold,
        }
    }

    /// Records a failure for `hash`.
    pub fn strike(&self, hash: &str) {
        self.strike_at(hash, Utc::now());
    }

    /// Records a failure for `hash` at `now`.
    pub fn strike_at(&self, hash: &str, now: DateTime<Utc>) {
        let Ok(mut records) = self.records.lock() else {
            return;
        };
        records.entry(hash.to_string()).or_default().push(now);
        self.persist(&records);
    }

    /// Number of hashes with at least one recorded strike.
    pub fn tracked(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn persist(&self, records: &Records) {
        if let Some(store) = &self.store {
            if let Err(e) = save_json(store.as_ref(), BLOCKLIST_KEY, records) {
                warn!("Failed to save blocked hashes: {}", e);
            }
        }
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new()
    }
}
