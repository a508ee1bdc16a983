//! Core data model types for adaptest.
//!
//! Items and their IRT parameters, calibration runs, responses, and the
//! per-session configuration that governs stopping and content balancing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a published item-bank version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Three-parameter logistic item parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemParams {
    /// Discrimination, strictly positive.
    pub a: f64,
    /// Difficulty on the theta scale.
    pub b: f64,
    /// Pseudo-guessing lower asymptote in `[0, 1)`.
    pub c: f64,
}

impl ItemParams {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    /// Check the parameters against the 3PL domain.
    pub fn validate(&self) -> Result<(), String> {
        if !self.a.is_finite() || self.a <= 0.0 {
            return Err(format!("discrimination a must be positive, got {}", self.a));
        }
        if !self.b.is_finite() {
            return Err(format!("difficulty b must be finite, got {}", self.b));
        }
        if !(0.0..1.0).contains(&self.c) {
            return Err(format!("guessing c must be in [0, 1), got {}", self.c));
        }
        Ok(())
    }
}

/// An item as produced by the calibration job, before it is stamped
/// with a bank version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratedItem {
    /// Stable item identifier, shared across versions.
    pub id: String,
    /// Reference into the external content store.
    #[serde(default)]
    pub content_ref: String,
    /// Fitted IRT parameters.
    pub params: ItemParams,
    /// Scoring key for the item.
    pub key: String,
    /// Whether the item may be administered.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Maximum desired exposure rate in `(0, 1]`.
    #[serde(default = "default_target_exposure")]
    pub target_exposure: f64,
    /// Content tags used for balancing.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A calibrated item pinned to a bank version. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub content_ref: String,
    pub params: ItemParams,
    pub version: VersionId,
    pub key: String,
    pub is_active: bool,
    pub target_exposure: f64,
    pub tags: Vec<String>,
}

impl Item {
    pub(crate) fn from_calibrated(item: &CalibratedItem, version: VersionId) -> Self {
        Self {
            id: item.id.clone(),
            content_ref: item.content_ref.clone(),
            params: item.params,
            version,
            key: item.key.clone(),
            is_active: item.is_active,
            target_exposure: item.target_exposure,
            tags: item.tags.clone(),
        }
    }

    /// Score an answer against this item's key.
    pub fn is_correct(&self, answer: &str) -> bool {
        answer.trim().eq_ignore_ascii_case(self.key.trim())
    }
}

fn default_true() -> bool {
    true
}

fn default_target_exposure() -> f64 {
    1.0
}

/// Outcome of the external calibration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationStatus {
    Completed,
    Failed,
}

/// A parameter set produced by the external calibration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRun {
    pub id: Uuid,
    pub status: CalibrationStatus,
    /// Number of responses the fit was based on.
    pub sample_size: u32,
    pub items: Vec<CalibratedItem>,
    pub created_at: DateTime<Utc>,
    /// Set once the run has been ingested and published.
    #[serde(default)]
    pub published_version: Option<VersionId>,
}

impl CalibrationRun {
    /// A completed run over the given items.
    pub fn completed(sample_size: u32, items: Vec<CalibratedItem>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: CalibrationStatus::Completed,
            sample_size,
            items,
            created_at: Utc::now(),
            published_version: None,
        }
    }
}

/// Ability estimation methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationMethod {
    #[default]
    Eap,
    Mle,
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationMethod::Eap => write!(f, "eap"),
            EstimationMethod::Mle => write!(f, "mle"),
        }
    }
}

impl FromStr for EstimationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eap" => Ok(EstimationMethod::Eap),
            "mle" | "ml" => Ok(EstimationMethod::Mle),
            other => Err(format!("unknown estimation method: {other}")),
        }
    }
}

/// A point estimate of ability with its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimate {
    pub theta: f64,
    pub se: f64,
    /// The method that actually produced the estimate (MLE may fall back to EAP).
    pub method: EstimationMethod,
}

impl AbilityEstimate {
    /// Prior mean and SD, used before any response is scored.
    pub fn prior() -> Self {
        Self {
            theta: 0.0,
            se: 1.0,
            method: EstimationMethod::Eap,
        }
    }
}

/// One scored answer. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub session_id: Uuid,
    pub item_id: String,
    pub item_version: VersionId,
    pub answer: String,
    pub correct: bool,
    pub latency_ms: u64,
    pub theta_before: f64,
    pub theta_after: f64,
    pub se_after: f64,
    /// Fisher information of the item at `theta_before`.
    pub information: f64,
    pub answered_at: DateTime<Utc>,
}

/// What a session does when exposure control rejects every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationPolicy {
    /// Give the best-ranked item anyway.
    #[default]
    AdministerBest,
    /// End the session as `Terminated(Exhausted)`.
    Terminate,
}

impl FromStr for DegradationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "administer_best" | "best" => Ok(DegradationPolicy::AdministerBest),
            "terminate" => Ok(DegradationPolicy::Terminate),
            other => Err(format!("unknown degradation policy: {other}")),
        }
    }
}

/// Stopping-rule configuration for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoppingRule {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_min_items")]
    pub min_items: usize,
    /// Stop once SE falls to this value (after `min_items`).
    #[serde(default = "default_se_threshold")]
    pub se_threshold: f64,
    /// Whole-session wall-clock limit.
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    /// Limit on how long a single presented item may stay unanswered.
    #[serde(default)]
    pub item_timeout_secs: Option<u64>,
}

impl Default for StoppingRule {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            min_items: default_min_items(),
            se_threshold: default_se_threshold(),
            time_limit_secs: None,
            item_timeout_secs: None,
        }
    }
}

fn default_max_items() -> usize {
    30
}

fn default_min_items() -> usize {
    5
}

fn default_se_threshold() -> f64 {
    0.3
}

/// Per-session configuration supplied by the delivery layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub stopping: StoppingRule,
    /// Minimum number of items per content tag.
    #[serde(default)]
    pub content_quotas: BTreeMap<String, usize>,
    #[serde(default)]
    pub degradation: DegradationPolicy,
}
