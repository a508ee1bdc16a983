//! Engine configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::estimator::EstimatorConfig;
use crate::exposure::ExposureConfig;
use crate::model::{EstimationMethod, SessionConfig};

/// Item bank publication limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    #[serde(default = "default_min_active_items")]
    pub min_active_items: usize,
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u32,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            min_active_items: default_min_active_items(),
            min_sample_size: default_min_sample_size(),
        }
    }
}

fn default_min_active_items() -> usize {
    5
}
fn default_min_sample_size() -> u32 {
    200
}

/// Settings for simulated test-taker runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of simulated test-takers.
    #[serde(default = "default_sessions")]
    pub sessions: usize,
    /// Max concurrently running sessions.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Mean of the true-ability distribution.
    #[serde(default)]
    pub theta_mean: f64,
    /// Standard deviation of the true-ability distribution.
    #[serde(default = "default_theta_sd")]
    pub theta_sd: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sessions: default_sessions(),
            parallelism: default_parallelism(),
            theta_mean: 0.0,
            theta_sd: default_theta_sd(),
        }
    }
}

fn default_sessions() -> usize {
    500
}
fn default_parallelism() -> usize {
    4
}
fn default_theta_sd() -> f64 {
    1.0
}

/// Top-level adaptest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptestConfig {
    /// Seed for exposure draws and simulated examinees.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Output directory for reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub exposure: ExposureConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub bank: BankConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./adaptest-results")
}

impl Default for AdaptestConfig {
    fn default() -> Self {
        Self {
            seed: None,
            output_dir: default_output_dir(),
            estimator: EstimatorConfig::default(),
            exposure: ExposureConfig::default(),
            session: SessionConfig::default(),
            bank: BankConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl From<&AdaptestConfig> for EngineConfig {
    fn from(config: &AdaptestConfig) -> Self {
        EngineConfig {
            estimator: config.estimator.clone(),
            exposure: config.exposure.clone(),
            min_active_items: config.bank.min_active_items,
            min_sample_size: config.bank.min_sample_size,
            seed: config.seed,
        }
    }
}

/// Load config from an explicit path, or search the default locations.
///
/// Search order without a path:
/// 1. `adaptest.toml` in the current directory
/// 2. `~/.config/adaptest/config.toml`
///
/// Environment variable overrides: `ADAPTEST_SEED`, `ADAPTEST_ESTIMATOR`.
pub fn load_config_from(path: Option<&Path>) -> Result<AdaptestConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("adaptest.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => AdaptestConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Parse configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AdaptestConfig> {
    let config: AdaptestConfig = toml::from_str(content)?;
    if config.estimator.theta_min >= config.estimator.theta_max {
        anyhow::bail!(
            "estimator.theta_min ({}) must be below theta_max ({})",
            config.estimator.theta_min,
            config.estimator.theta_max
        );
    }
    if config.estimator.quadrature_points < 2 {
        anyhow::bail!("estimator.quadrature_points must be at least 2");
    }
    config.exposure.validate().map_err(anyhow::Error::msg)?;
    let stopping = &config.session.stopping;
    if stopping.min_items > stopping.max_items {
        anyhow::bail!(
            "session.stopping.min_items ({}) exceeds max_items ({})",
            stopping.min_items,
            stopping.max_items
        );
    }
    Ok(config)
}

fn apply_env_overrides(config: &mut AdaptestConfig) -> Result<()> {
    if let Ok(seed) = std::env::var("ADAPTEST_SEED") {
        config.seed = Some(
            seed.parse()
                .with_context(|| format!("ADAPTEST_SEED is not an integer: {seed}"))?,
        );
    }
    if let Ok(method) = std::env::var("ADAPTEST_ESTIMATOR") {
        config.estimator.method = method
            .parse::<EstimationMethod>()
            .map_err(anyhow::Error::msg)?;
    }
    Ok(())
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("adaptest"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AdaptestConfig::default();
        assert_eq!(config.bank.min_active_items, 5);
        assert_eq!(config.simulation.parallelism, 4);
        assert_eq!(config.estimator.quadrature_points, 61);
        assert_eq!(config.session.stopping.max_items, 30);
        assert!(config.seed.is_none());
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
seed = 7

[estimator]
method = "mle"

[exposure]
baseline_sessions = 50

[session.stopping]
max_items = 20
se_threshold = 0.25

[session.content_quotas]
algebra = 3

[bank]
min_sample_size = 500
"#;
        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.estimator.method, EstimationMethod::Mle);
        assert_eq!(config.estimator.theta_max, 4.0);
        assert_eq!(config.exposure.baseline_sessions, 50);
        assert_eq!(config.exposure.epoch_sessions, 200);
        assert_eq!(config.session.stopping.max_items, 20);
        assert_eq!(config.session.stopping.min_items, 5);
        assert_eq!(config.session.content_quotas["algebra"], 3);
        assert_eq!(config.bank.min_sample_size, 500);
        assert_eq!(config.bank.min_active_items, 5);

        let engine = EngineConfig::from(&config);
        assert_eq!(engine.seed, Some(7));
        assert_eq!(engine.min_sample_size, 500);
    }

    #[test]
    fn rejects_inconsistent_values() {
        assert!(parse_config("[estimator]\ntheta_min = 4.0\ntheta_max = -4.0").is_err());
        assert!(parse_config("[session.stopping]\nmin_items = 10\nmax_items = 5").is_err());
        assert!(parse_config("[exposure]\nmax_growth = 0.5").is_err());
        let err = parse_config("[exposure]\nmin_k = 0.0").unwrap_err();
        assert!(err.to_string().contains("min_k"));
        assert!(parse_config("[exposure]\nmin_k = 1.0").is_ok());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_config_from(Some(Path::new("/nonexistent/adaptest.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn loads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adaptest.toml");
        std::fs::write(&path, "[simulation]\nsessions = 42\n").unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.simulation.sessions, 42);
    }
}
