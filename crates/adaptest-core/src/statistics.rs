//! Ability recovery and item exposure statistics for simulation runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::exposure::ExposureRecord;
use crate::report::SimulatedSession;
use crate::session::SessionState;

/// How well a simulation recovered the true abilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Number of sessions included.
    pub sessions: usize,
    /// Mean of `estimate - truth`.
    pub bias: f64,
    /// Root mean squared error of the estimates.
    pub rmse: f64,
    pub mean_abs_error: f64,
    /// Pearson correlation between true and estimated ability.
    pub correlation: Option<f64>,
    /// Average reported standard error.
    pub mean_se: f64,
    /// Average number of items administered.
    pub mean_length: f64,
    /// Session count per final state.
    pub outcomes: BTreeMap<String, usize>,
}

impl RecoveryStats {
    /// Compute recovery statistics over all sessions that produced a
    /// scored response.
    pub fn compute(sessions: &[SimulatedSession]) -> Self {
        let mut outcomes = BTreeMap::new();
        for s in sessions {
            *outcomes.entry(state_label(s.result.state)).or_insert(0) += 1;
        }

        let scored: Vec<&SimulatedSession> = sessions
            .iter()
            .filter(|s| s.result.items_administered > 0)
            .collect();
        if scored.is_empty() {
            return Self {
                sessions: 0,
                outcomes,
                ..Default::default()
            };
        }

        let n = scored.len() as f64;
        let errors: Vec<f64> = scored
            .iter()
            .map(|s| s.result.estimate.theta - s.true_theta)
            .collect();
        let truths: Vec<f64> = scored.iter().map(|s| s.true_theta).collect();
        let estimates: Vec<f64> = scored.iter().map(|s| s.result.estimate.theta).collect();

        Self {
            sessions: scored.len(),
            bias: errors.iter().sum::<f64>() / n,
            rmse: (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt(),
            mean_abs_error: errors.iter().map(|e| e.abs()).sum::<f64>() / n,
            correlation: pearson(&truths, &estimates),
            mean_se: scored.iter().map(|s| s.result.estimate.se).sum::<f64>() / n,
            mean_length: scored
                .iter()
                .map(|s| s.result.items_administered as f64)
                .sum::<f64>()
                / n,
            outcomes,
        }
    }
}

fn state_label(state: SessionState) -> String {
    match state {
        SessionState::Initializing => "initializing".into(),
        SessionState::InProgress => "in_progress".into(),
        SessionState::Completed(reason) => format!("completed:{reason:?}"),
        SessionState::Terminated(reason) => format!("terminated:{reason:?}"),
    }
}

/// Pearson correlation coefficient. `None` when either side has no variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

/// Exposure of one item aggregated over several epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSummary {
    pub item_id: String,
    pub target_exposure: f64,
    pub eligible: u64,
    pub administered: u64,
    /// `administered / eligible` over the aggregated epochs.
    pub rate: f64,
    /// Control parameter in the latest aggregated epoch.
    pub final_k: f64,
}

impl ExposureSummary {
    /// Whether the observed rate exceeds the target by more than `tolerance`.
    pub fn is_overexposed(&self, tolerance: f64) -> bool {
        self.rate > self.target_exposure + tolerance
    }
}

/// Aggregate per-epoch records from `from_epoch` onward, one entry per item.
pub fn summarize_exposure(records: &[ExposureRecord], from_epoch: u64) -> Vec<ExposureSummary> {
    let mut by_item: BTreeMap<&str, (ExposureSummary, u64)> = BTreeMap::new();
    for record in records.iter().filter(|r| r.epoch >= from_epoch) {
        let (summary, latest) = by_item.entry(record.item_id.as_str()).or_insert_with(|| {
            (
                ExposureSummary {
                    item_id: record.item_id.clone(),
                    target_exposure: record.target_exposure,
                    eligible: 0,
                    administered: 0,
                    rate: 0.0,
                    final_k: record.k,
                },
                record.epoch,
            )
        });
        summary.eligible += record.eligible_count;
        summary.administered += record.administered_count;
        if record.epoch >= *latest {
            *latest = record.epoch;
            summary.final_k = record.k;
            summary.target_exposure = record.target_exposure;
        }
    }

    by_item
        .into_values()
        .map(|(mut summary, _)| {
            if summary.eligible > 0 {
                summary.rate = summary.administered as f64 / summary.eligible as f64;
            }
            summary
        })
        .collect()
}
