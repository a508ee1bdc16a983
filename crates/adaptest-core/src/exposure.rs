//! Sympson-Hetter exposure control.
//!
//! Every item owns an [`ExposureCell`]: eligible and administered counts
//! packed into one `AtomicU64` (eligible in the high 32 bits) plus the
//! control parameter `k` stored as `f64` bits. A candidate evaluation and
//! its acceptance land in a single `fetch_add`, so concurrent sessions
//! never lose updates and `administered <= eligible` holds at every
//! instant within an epoch.
//!
//! ## Phases
//!
//! 1. **Baseline** (first `baseline_sessions` sessions): `k = 1` for all
//!    items, statistics are gathered without control.
//! 2. **Adaptive**: at each epoch rollover `k` is rescaled by
//!    `target / observed`, clamped to `[min_k, 1]`, with upward moves
//!    limited to `max_growth` per epoch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::Item;

const ELIGIBLE_ONE: u64 = 1 << 32;
const ADMINISTERED_MASK: u64 = ELIGIBLE_ONE - 1;

/// Exposure-control tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Sessions run without control before adaptation starts.
    #[serde(default = "default_baseline_sessions")]
    pub baseline_sessions: u64,
    /// Sessions per adaptive epoch.
    #[serde(default = "default_epoch_sessions")]
    pub epoch_sessions: u64,
    /// Lower bound on `k`.
    #[serde(default = "default_min_k")]
    pub min_k: f64,
    /// Largest factor by which `k` may grow in one rollover.
    #[serde(default = "default_max_growth")]
    pub max_growth: f64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            baseline_sessions: default_baseline_sessions(),
            epoch_sessions: default_epoch_sessions(),
            min_k: default_min_k(),
            max_growth: default_max_growth(),
        }
    }
}

impl ExposureConfig {
    /// Check that `min_k` lies in (0, 1] and `max_growth` is at least 1.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_k > 0.0 && self.min_k <= 1.0) {
            return Err(format!("exposure.min_k must be in (0, 1], got {}", self.min_k));
        }
        if self.max_growth.is_nan() || self.max_growth < 1.0 {
            return Err(format!(
                "exposure.max_growth must be at least 1, got {}",
                self.max_growth
            ));
        }
        Ok(())
    }

    /// Replace out-of-range tuning values with their defaults.
    fn sanitized(mut self) -> Self {
        if !(self.min_k > 0.0 && self.min_k <= 1.0) {
            tracing::warn!(min_k = self.min_k, "invalid exposure.min_k, using default");
            self.min_k = default_min_k();
        }
        if self.max_growth.is_nan() || self.max_growth < 1.0 {
            tracing::warn!(
                max_growth = self.max_growth,
                "invalid exposure.max_growth, using default"
            );
            self.max_growth = default_max_growth();
        }
        self
    }
}

fn default_baseline_sessions() -> u64 {
    100
}
fn default_epoch_sessions() -> u64 {
    200
}
fn default_min_k() -> f64 {
    0.01
}
fn default_max_growth() -> f64 {
    2.0
}

/// Which exposure-control phase is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposurePhase {
    Baseline,
    Adaptive,
}

/// Counters for one item over one control epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub item_id: String,
    pub epoch: u64,
    pub eligible_count: u64,
    pub administered_count: u64,
    /// Control parameter in force during the epoch.
    pub k: f64,
    pub target_exposure: f64,
}

impl ExposureRecord {
    /// Observed administered/eligible ratio (0 when never eligible).
    pub fn rate(&self) -> f64 {
        if self.eligible_count == 0 {
            0.0
        } else {
            self.administered_count as f64 / self.eligible_count as f64
        }
    }
}

/// Lock-free exposure state for a single item.
#[derive(Debug)]
pub struct ExposureCell {
    item_id: String,
    counts: AtomicU64,
    k: AtomicU64,
    target: AtomicU64,
}

impl ExposureCell {
    fn new(item_id: &str, target: f64) -> Self {
        Self {
            item_id: item_id.to_string(),
            counts: AtomicU64::new(0),
            k: AtomicU64::new(1.0f64.to_bits()),
            target: AtomicU64::new(target.to_bits()),
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Current `(eligible, administered)` counts.
    pub fn counts(&self) -> (u64, u64) {
        unpack(self.counts.load(Ordering::Acquire))
    }

    /// Current control parameter.
    pub fn k(&self) -> f64 {
        f64::from_bits(self.k.load(Ordering::Acquire))
    }

    pub fn target(&self) -> f64 {
        f64::from_bits(self.target.load(Ordering::Acquire))
    }

    /// Evaluate this item as a candidate: count the evaluation and accept
    /// with probability `k`. Returns whether the item is administered.
    pub fn evaluate<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        let accepted = rng.gen::<f64>() < self.k();
        let delta = if accepted { ELIGIBLE_ONE + 1 } else { ELIGIBLE_ONE };
        self.counts.fetch_add(delta, Ordering::AcqRel);
        accepted
    }

    /// Administer without consulting `k` (graceful degradation). Counted
    /// as one more evaluation so the per-epoch invariant still holds.
    pub fn record_forced_administration(&self) {
        self.counts.fetch_add(ELIGIBLE_ONE + 1, Ordering::AcqRel);
    }

    fn set_k(&self, k: f64) {
        self.k.store(k.to_bits(), Ordering::Release);
    }

    fn set_target(&self, target: f64) {
        self.target.store(target.to_bits(), Ordering::Release);
    }

    fn take_counts(&self) -> (u64, u64) {
        unpack(self.counts.swap(0, Ordering::AcqRel))
    }
}

fn unpack(packed: u64) -> (u64, u64) {
    (packed >> 32, packed & ADMINISTERED_MASK)
}

/// Shared exposure state for every item ever published.
#[derive(Debug)]
pub struct ExposureControl {
    config: ExposureConfig,
    cells: Mutex<HashMap<String, Arc<ExposureCell>>>,
    sessions_started: AtomicU64,
    epoch: AtomicU64,
    history: Mutex<Vec<ExposureRecord>>,
}

impl ExposureControl {
    pub fn new(config: ExposureConfig) -> Self {
        Self {
            config: config.sanitized(),
            cells: Mutex::new(HashMap::new()),
            sessions_started: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ExposureConfig {
        &self.config
    }

    /// Cells for `items`, in the same order. Items already known keep
    /// their counters and `k` across bank versions.
    pub fn register(&self, items: &[Item]) -> Vec<Arc<ExposureCell>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        items
            .iter()
            .map(|item| {
                let cell = cells
                    .entry(item.id.clone())
                    .or_insert_with(|| Arc::new(ExposureCell::new(&item.id, item.target_exposure)));
                cell.set_target(item.target_exposure);
                Arc::clone(cell)
            })
            .collect()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> ExposurePhase {
        if self.config.baseline_sessions > 0 && self.epoch() == 0 {
            ExposurePhase::Baseline
        } else {
            ExposurePhase::Adaptive
        }
    }

    /// Count a new session. Rolls the epoch over when the session count
    /// crosses the baseline or an epoch boundary; returns the closed
    /// epoch's records in that case.
    pub fn begin_session(&self) -> Option<Vec<ExposureRecord>> {
        let started = self.sessions_started.fetch_add(1, Ordering::AcqRel) + 1;
        let baseline = self.config.baseline_sessions;
        let epoch_len = self.config.epoch_sessions.max(1);

        let boundary = if started <= baseline {
            started == baseline
        } else {
            (started - baseline) % epoch_len == 0
        };
        boundary.then(|| self.rollover())
    }

    /// Close the current epoch: snapshot and reset every counter, then
    /// retune `k` from what was observed.
    pub fn rollover(&self) -> Vec<ExposureRecord> {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        let epoch = self.epoch.load(Ordering::Acquire);

        let mut records: Vec<ExposureRecord> = cells
            .values()
            .map(|cell| {
                let (eligible, administered) = cell.take_counts();
                let k = cell.k();
                let target = cell.target();
                if eligible > 0 {
                    cell.set_k(self.next_k(k, target, administered as f64 / eligible as f64));
                }
                ExposureRecord {
                    item_id: cell.item_id.clone(),
                    epoch,
                    eligible_count: eligible,
                    administered_count: administered,
                    k,
                    target_exposure: target,
                }
            })
            .collect();
        records.sort_by(|a, b| a.item_id.cmp(&b.item_id));

        self.epoch.store(epoch + 1, Ordering::Release);
        drop(cells);

        let overexposed = records
            .iter()
            .filter(|r| r.rate() > r.target_exposure)
            .count();
        tracing::info!(
            epoch,
            items = records.len(),
            overexposed,
            "exposure epoch closed"
        );

        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(records.iter().cloned());
        records
    }

    fn next_k(&self, k: f64, target: f64, observed: f64) -> f64 {
        let factor = if observed > 0.0 {
            (target / observed).min(self.config.max_growth)
        } else {
            self.config.max_growth
        };
        (k * factor).clamp(self.config.min_k, 1.0)
    }

    /// Live counters for the current epoch.
    pub fn snapshot(&self) -> Vec<ExposureRecord> {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        let epoch = self.epoch();
        let mut records: Vec<ExposureRecord> = cells
            .values()
            .map(|cell| {
                let (eligible, administered) = cell.counts();
                ExposureRecord {
                    item_id: cell.item_id.clone(),
                    epoch,
                    eligible_count: eligible,
                    administered_count: administered,
                    k: cell.k(),
                    target_exposure: cell.target(),
                }
            })
            .collect();
        records.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        records
    }

    /// Records of every closed epoch, oldest first.
    pub fn history(&self) -> Vec<ExposureRecord> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for ExposureControl {
    fn default() -> Self {
        Self::new(ExposureConfig::default())
    }
}
