//! Ability estimation from a scored response history.
//!
//! Both estimators are pure functions of the history and the item
//! parameters it references, so a session's trajectory can be rebuilt by
//! replaying its responses.

use serde::{Deserialize, Serialize};

use crate::error::EstimationError;
use crate::irt;
use crate::model::{AbilityEstimate, EstimationMethod, ItemParams};

/// Estimator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default)]
    pub method: EstimationMethod,
    /// Number of EAP quadrature nodes.
    #[serde(default = "default_quadrature_points")]
    pub quadrature_points: usize,
    #[serde(default = "default_theta_min")]
    pub theta_min: f64,
    #[serde(default = "default_theta_max")]
    pub theta_max: f64,
    /// Newton-Raphson convergence threshold on |Δθ|.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            method: EstimationMethod::default(),
            quadrature_points: default_quadrature_points(),
            theta_min: default_theta_min(),
            theta_max: default_theta_max(),
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_quadrature_points() -> usize {
    61
}
fn default_theta_min() -> f64 {
    -4.0
}
fn default_theta_max() -> f64 {
    4.0
}
fn default_tolerance() -> f64 {
    1e-4
}
fn default_max_iterations() -> u32 {
    50
}

/// A response reduced to what estimation needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredItem {
    pub params: ItemParams,
    pub correct: bool,
}

impl ScoredItem {
    pub fn new(params: ItemParams, correct: bool) -> Self {
        Self { params, correct }
    }
}

/// Computes θ̂ and SE(θ̂) under the 3PL model with a standard-normal prior.
#[derive(Debug, Clone)]
pub struct AbilityEstimator {
    config: EstimatorConfig,
    nodes: Vec<f64>,
    log_prior: Vec<f64>,
}

impl AbilityEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let n = config.quadrature_points.max(2);
        let (lo, hi) = (config.theta_min, config.theta_max);
        let step = (hi - lo) / (n - 1) as f64;
        let nodes: Vec<f64> = (0..n).map(|i| lo + step * i as f64).collect();
        // Unnormalized: the constant cancels in the posterior.
        let log_prior = nodes.iter().map(|t| -0.5 * t * t).collect();
        Self {
            config,
            nodes,
            log_prior,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn method(&self) -> EstimationMethod {
        self.config.method
    }

    /// Estimate ability with the configured method.
    ///
    /// MLE failures fall back to EAP; this never fails.
    pub fn estimate(&self, history: &[ScoredItem]) -> AbilityEstimate {
        if history.is_empty() {
            return AbilityEstimate::prior();
        }
        match self.config.method {
            EstimationMethod::Eap => self.eap(history),
            EstimationMethod::Mle => self.mle(history).unwrap_or_else(|err| {
                tracing::debug!("falling back to EAP: {err}");
                self.eap(history)
            }),
        }
    }

    /// Expected a posteriori estimate over the quadrature grid.
    pub fn eap(&self, history: &[ScoredItem]) -> AbilityEstimate {
        if history.is_empty() {
            return AbilityEstimate::prior();
        }

        let log_post: Vec<f64> = self
            .nodes
            .iter()
            .zip(&self.log_prior)
            .map(|(&theta, &lp)| {
                lp + history
                    .iter()
                    .map(|r| irt::log_likelihood(&r.params, theta, r.correct))
                    .sum::<f64>()
            })
            .collect();

        // Shift by the max before exponentiating so long histories don't underflow.
        let max = log_post.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = log_post.iter().map(|lp| (lp - max).exp()).collect();
        let total: f64 = weights.iter().sum();

        let mean = self
            .nodes
            .iter()
            .zip(&weights)
            .map(|(t, w)| t * w)
            .sum::<f64>()
            / total;
        let variance = self
            .nodes
            .iter()
            .zip(&weights)
            .map(|(t, w)| (t - mean).powi(2) * w)
            .sum::<f64>()
            / total;

        AbilityEstimate {
            theta: mean,
            se: variance.max(0.0).sqrt(),
            method: EstimationMethod::Eap,
        }
    }

    /// Maximum-likelihood estimate by bounded Newton-Raphson.
    pub fn mle(&self, history: &[ScoredItem]) -> Result<AbilityEstimate, EstimationError> {
        let (lo, hi) = (self.config.theta_min, self.config.theta_max);
        let all_same = history.windows(2).all(|w| w[0].correct == w[1].correct);
        if history.is_empty() || all_same {
            // No interior maximum exists for a constant pattern.
            return Err(EstimationError::NonConvergence {
                iterations: 0,
                theta: 0.0,
            });
        }

        let mut theta = self.eap(history).theta.clamp(lo, hi);
        for iteration in 1..=self.config.max_iterations {
            let (first, second) = history.iter().fold((0.0, 0.0), |(d1, d2), r| {
                let (f, s) = irt::log_likelihood_derivatives(&r.params, theta, r.correct);
                (d1 + f, d2 + s)
            });
            if !second.is_finite() || second >= 0.0 {
                return Err(EstimationError::NonConvergence {
                    iterations: iteration,
                    theta,
                });
            }

            let next = (theta - first / second).clamp(lo, hi);
            let delta = (next - theta).abs();
            theta = next;
            if delta < self.config.tolerance {
                let at_bound = (theta - lo).abs() < self.config.tolerance
                    || (hi - theta).abs() < self.config.tolerance;
                if at_bound {
                    return Err(EstimationError::NonConvergence {
                        iterations: iteration,
                        theta,
                    });
                }
                let info = test_information(history.iter().map(|r| &r.params), theta);
                return Ok(AbilityEstimate {
                    theta,
                    se: 1.0 / info.sqrt(),
                    method: EstimationMethod::Mle,
                });
            }
        }

        Err(EstimationError::NonConvergence {
            iterations: self.config.max_iterations,
            theta,
        })
    }
}

impl Default for AbilityEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

/// Sum of item information at `theta`.
pub fn test_information<'a>(params: impl IntoIterator<Item = &'a ItemParams>, theta: f64) -> f64 {
    params
        .into_iter()
        .map(|p| irt::information(p, theta))
        .sum()
}
