//! Session and simulation reports with JSON persistence.
//!
//! A [`SessionReport`] carries everything needed to audit a session after
//! the fact: the response log, the parameters of every item shown, and the
//! estimator settings. Replaying it must reproduce the recorded estimate.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CatError;
use crate::estimator::{AbilityEstimator, EstimatorConfig};
use crate::model::{AbilityEstimate, Item, Response, VersionId};
use crate::session::{self, SessionResult, SessionSummary};
use crate::statistics::{ExposureSummary, RecoveryStats};

/// Audit record of a single session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: SessionSummary,
    /// Response log, in the order responses were scored.
    pub responses: Vec<Response>,
    /// Items the session administered, with the parameters used.
    pub items: Vec<Item>,
    pub estimator: EstimatorConfig,
    pub generated_at: DateTime<Utc>,
}

/// Outcome of re-estimating a session from its log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayCheck {
    pub recorded: AbilityEstimate,
    pub replayed: AbilityEstimate,
}

impl ReplayCheck {
    /// Whether both θ and SE agree within `tolerance`.
    pub fn matches(&self, tolerance: f64) -> bool {
        (self.recorded.theta - self.replayed.theta).abs() <= tolerance
            && (self.recorded.se - self.replayed.se).abs() <= tolerance
    }
}

impl SessionReport {
    pub fn new(
        session: SessionSummary,
        responses: Vec<Response>,
        items: Vec<Item>,
        estimator: EstimatorConfig,
    ) -> Self {
        Self {
            session,
            responses,
            items,
            estimator,
            generated_at: Utc::now(),
        }
    }

    /// Re-run estimation over the logged responses.
    pub fn replay(&self) -> Result<ReplayCheck, CatError> {
        let estimator = AbilityEstimator::new(self.estimator.clone());
        let replayed = session::replay(&self.responses, &self.items, &estimator)?;
        Ok(ReplayCheck {
            recorded: self.session.estimate,
            replayed,
        })
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

/// A simulated test-taker's session with the ability it was generated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedSession {
    pub examinee_id: String,
    pub true_theta: f64,
    pub result: SessionResult,
}

/// Result of a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Unique report identifier.
    pub id: Uuid,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    /// Bank version the sessions started on.
    pub bank_version: VersionId,
    pub seed: Option<u64>,
    pub sessions: Vec<SimulatedSession>,
    pub recovery: RecoveryStats,
    /// Exposure over the adaptive epochs (all epochs if none closed).
    pub exposure: Vec<ExposureSummary>,
    /// Reports of individual sessions, when requested.
    #[serde(default)]
    pub session_reports: Vec<SessionReport>,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl SimulationReport {
    /// Items whose observed exposure exceeds their target by `tolerance`.
    pub fn overexposed(&self, tolerance: f64) -> Vec<&ExposureSummary> {
        self.exposure
            .iter()
            .filter(|e| e.is_overexposed(tolerance))
            .collect()
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read report from {}", path.display()))?;
    serde_json::from_str(&content).context("failed to parse report JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CatEngine, EngineConfig};
    use crate::model::{CalibratedItem, CalibrationRun, ItemParams, SessionConfig, StoppingRule};
    use crate::session::Step;
    use std::time::Duration;

    fn engine_with_session() -> (CatEngine, Uuid) {
        let engine = CatEngine::new(EngineConfig {
            min_active_items: 1,
            min_sample_size: 1,
            seed: Some(9),
            ..Default::default()
        });
        let items = (0..6)
            .map(|i| CalibratedItem {
                id: format!("q{i}"),
                content_ref: String::new(),
                params: ItemParams::new(1.0, i as f64 - 2.5, 0.2),
                key: "A".into(),
                is_active: true,
                target_exposure: 1.0,
                tags: vec![],
            })
            .collect();
        engine
            .publish(CalibrationRun::completed(100, items))
            .unwrap();

        let config = SessionConfig {
            stopping: StoppingRule {
                max_items: 4,
                ..Default::default()
            },
            ..Default::default()
        };
        let started = engine.start_session("auditee", config).unwrap();
        let mut step = started.step;
        let mut flip = false;
        while let Step::NextItem(item) = &step {
            flip = !flip;
            let answer = if flip { "A" } else { "B" };
            step = engine
                .submit_response(started.session_id, &item.item_id, answer, Duration::ZERO)
                .unwrap();
        }
        (engine, started.session_id)
    }

    #[test]
    fn replay_from_report_matches_recorded_estimate() {
        let (engine, id) = engine_with_session();
        let report = engine.session_report(id).unwrap();
        assert_eq!(report.responses.len(), 4);
        assert_eq!(report.items.len(), 4);
        assert!(report.replay().unwrap().matches(1e-9));
    }

    #[test]
    fn json_roundtrip_preserves_replay() {
        let (engine, id) = engine_with_session();
        let report = engine.session_report(id).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        report.save_json(&path).unwrap();
        let loaded = SessionReport::load_json(&path).unwrap();
        assert_eq!(loaded.session.session_id, id);
        assert!(loaded.replay().unwrap().matches(1e-9));
    }

    #[test]
    fn tampered_log_fails_replay_check() {
        let (engine, id) = engine_with_session();
        let mut report = engine.session_report(id).unwrap();
        for response in &mut report.responses {
            response.correct = true;
        }
        assert!(!report.replay().unwrap().matches(1e-6));
    }

    #[test]
    fn replay_rejects_unknown_items() {
        let (engine, id) = engine_with_session();
        let mut report = engine.session_report(id).unwrap();
        report.items.pop();
        assert!(matches!(
            report.replay(),
            Err(CatError::UnknownItem { .. })
        ));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(SimulationReport::load_json(Path::new("/nonexistent/report.json")).is_err());
    }
}
