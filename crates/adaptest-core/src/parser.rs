//! TOML item bank parser.
//!
//! Loads calibration runs from TOML files and directories, and checks them
//! for parameter values that are legal but suspicious.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::model::{CalibratedItem, CalibrationRun, CalibrationStatus, ItemParams};

/// Intermediate TOML structure for parsing item bank files.
#[derive(Debug, Deserialize)]
struct TomlBankFile {
    calibration: TomlCalibrationHeader,
    #[serde(default)]
    items: Vec<TomlItem>,
}

#[derive(Debug, Deserialize)]
struct TomlCalibrationHeader {
    #[serde(default)]
    id: Option<Uuid>,
    sample_size: u32,
    #[serde(default = "default_status")]
    status: CalibrationStatus,
}

fn default_status() -> CalibrationStatus {
    CalibrationStatus::Completed
}

#[derive(Debug, Deserialize)]
struct TomlItem {
    id: String,
    #[serde(default)]
    content_ref: String,
    a: f64,
    b: f64,
    #[serde(default)]
    c: f64,
    key: String,
    #[serde(default = "default_target")]
    target_exposure: f64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_target() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Parse a single TOML file into a `CalibrationRun`.
pub fn parse_item_bank(path: &Path) -> Result<CalibrationRun> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read item bank file: {}", path.display()))?;

    parse_item_bank_str(&content, path)
}

/// Parse a TOML string into a `CalibrationRun` (useful for testing).
pub fn parse_item_bank_str(content: &str, source_path: &Path) -> Result<CalibrationRun> {
    let parsed: TomlBankFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let items = parsed
        .items
        .into_iter()
        .map(|i| CalibratedItem {
            id: i.id,
            content_ref: i.content_ref,
            params: ItemParams::new(i.a, i.b, i.c),
            key: i.key,
            is_active: i.active,
            target_exposure: i.target_exposure,
            tags: i.tags,
        })
        .collect();

    Ok(CalibrationRun {
        id: parsed.calibration.id.unwrap_or_else(Uuid::new_v4),
        status: parsed.calibration.status,
        sample_size: parsed.calibration.sample_size,
        items,
        created_at: Utc::now(),
        published_version: None,
    })
}

/// Recursively load all `.toml` item bank files from a directory.
pub fn load_bank_directory(dir: &Path) -> Result<Vec<CalibrationRun>> {
    let mut runs = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            runs.extend(load_bank_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_item_bank(&path) {
                Ok(run) => runs.push(run),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(runs)
}

/// A warning from item bank validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The item ID (if applicable).
    pub item_id: Option<String>,
    /// Warning message.
    pub message: String,
}

/// Validate a calibration run for common issues.
///
/// Hard errors (which would make publication fail) and soft warnings about
/// poorly-behaved items are both reported here.
pub fn validate_bank(run: &CalibrationRun) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let warn = |item: &CalibratedItem, message: String| ValidationWarning {
        item_id: Some(item.id.clone()),
        message,
    };

    if run.items.is_empty() {
        warnings.push(ValidationWarning {
            item_id: None,
            message: "bank contains no items".into(),
        });
    }
    if run.status == CalibrationStatus::Failed {
        warnings.push(ValidationWarning {
            item_id: None,
            message: "calibration run is marked failed".into(),
        });
    }

    let mut seen_ids = std::collections::HashSet::new();
    for item in &run.items {
        if !seen_ids.insert(&item.id) {
            warnings.push(warn(item, format!("duplicate item ID: {}", item.id)));
        }
    }

    for item in &run.items {
        let p = &item.params;
        if let Err(reason) = p.validate() {
            warnings.push(warn(item, format!("invalid parameters: {reason}")));
            continue;
        }
        if p.a < 0.3 {
            warnings.push(warn(item, format!("low discrimination a={:.3}", p.a)));
        }
        if p.c > 0.35 {
            warnings.push(warn(item, format!("high guessing c={:.3}", p.c)));
        }
        if p.b.abs() > 3.5 {
            warnings.push(warn(item, format!("extreme difficulty b={:.3}", p.b)));
        }
    }

    for item in &run.items {
        if !(item.target_exposure > 0.0 && item.target_exposure <= 1.0) {
            warnings.push(warn(
                item,
                format!("target_exposure {} outside (0, 1]", item.target_exposure),
            ));
        } else if item.target_exposure < 0.05 {
            warnings.push(warn(
                item,
                format!(
                    "target_exposure {} is very small; item will rarely be shown",
                    item.target_exposure
                ),
            ));
        }
        if item.key.trim().is_empty() {
            warnings.push(warn(item, "answer key is empty".into()));
        }
    }

    if run.items.iter().all(|i| !i.is_active) && !run.items.is_empty() {
        warnings.push(ValidationWarning {
            item_id: None,
            message: "no item is active".into(),
        });
    }

    warnings
}
