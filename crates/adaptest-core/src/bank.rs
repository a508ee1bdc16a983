//! Versioned item bank.
//!
//! Each published parameter set becomes an immutable [`BankVersion`].
//! New sessions pin the current version by cloning its `Arc`; publishing
//! swaps the pointer, so sessions already running keep resolving items
//! from the version they started with.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CatError;
use crate::exposure::{ExposureCell, ExposureControl};
use crate::model::{CalibrationRun, Item, VersionId};

/// An immutable, published set of items.
#[derive(Debug)]
pub struct BankVersion {
    id: VersionId,
    items: Vec<Item>,
    exposure: Vec<Arc<ExposureCell>>,
    positions: HashMap<String, usize>,
    calibration_run: Uuid,
    published_at: DateTime<Utc>,
}

impl BankVersion {
    pub fn id(&self) -> VersionId {
        self.id
    }

    /// All items, active or not, in bank order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    /// Bank index of an item id.
    pub fn position(&self, item_id: &str) -> Option<usize> {
        self.positions.get(item_id).copied()
    }

    /// Exposure cell for the item at `index`.
    pub fn exposure(&self, index: usize) -> Option<&ExposureCell> {
        self.exposure.get(index).map(Arc::as_ref)
    }

    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_active)
            .map(|(i, _)| i)
    }

    pub fn active_items(&self) -> Vec<Item> {
        self.items.iter().filter(|i| i.is_active).cloned().collect()
    }

    pub fn calibration_run(&self) -> Uuid {
        self.calibration_run
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The read-mostly store of published versions.
#[derive(Debug)]
pub struct ItemBank {
    current: RwLock<Option<Arc<BankVersion>>>,
    versions: Mutex<BTreeMap<VersionId, Arc<BankVersion>>>,
    exposure: Arc<ExposureControl>,
    min_active_items: usize,
}

impl ItemBank {
    pub fn new(exposure: Arc<ExposureControl>, min_active_items: usize) -> Self {
        Self {
            current: RwLock::new(None),
            versions: Mutex::new(BTreeMap::new()),
            exposure,
            min_active_items,
        }
    }

    pub fn exposure(&self) -> &Arc<ExposureControl> {
        &self.exposure
    }

    pub fn min_active_items(&self) -> usize {
        self.min_active_items
    }

    /// The version new sessions should pin.
    pub fn current(&self) -> Result<Arc<BankVersion>, CatError> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(CatError::EmptyBank {
                active: 0,
                required: self.min_active_items,
            })
    }

    pub fn version(&self, id: VersionId) -> Result<Arc<BankVersion>, CatError> {
        self.versions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(CatError::VersionNotFound(id))
    }

    /// Active items of a published version.
    pub fn get_active_items(&self, id: VersionId) -> Result<Vec<Item>, CatError> {
        Ok(self.version(id)?.active_items())
    }

    /// Retained version ids, oldest first.
    pub fn versions(&self) -> Vec<VersionId> {
        self.versions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Validate a calibration run's parameters and publish them as the
    /// new current version.
    pub fn publish_version(&self, run: &CalibrationRun) -> Result<VersionId, CatError> {
        validate_items(run)?;
        let active = run.items.iter().filter(|i| i.is_active).count();
        if active < self.min_active_items {
            return Err(CatError::EmptyBank {
                active,
                required: self.min_active_items,
            });
        }

        // Holding the map lock serializes publishers.
        let mut versions = self.versions.lock().unwrap_or_else(|e| e.into_inner());
        let id = VersionId(versions.keys().next_back().map_or(1, |v| v.0 + 1));

        let items: Vec<Item> = run
            .items
            .iter()
            .map(|item| Item::from_calibrated(item, id))
            .collect();
        let exposure = self.exposure.register(&items);
        let positions = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();

        let version = Arc::new(BankVersion {
            id,
            items,
            exposure,
            positions,
            calibration_run: run.id,
            published_at: Utc::now(),
        });
        versions.insert(id, Arc::clone(&version));
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(version);

        tracing::info!(version = %id, active, run = %run.id, "published item bank version");
        Ok(id)
    }

    /// Drop superseded versions that no session holds any more.
    pub fn release_unreferenced(&self) -> Vec<VersionId> {
        let current = self
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|v| v.id);
        let mut versions = self.versions.lock().unwrap_or_else(|e| e.into_inner());
        let released: Vec<VersionId> = versions
            .iter()
            .filter(|(id, v)| Some(**id) != current && Arc::strong_count(v) == 1)
            .map(|(id, _)| *id)
            .collect();
        for id in &released {
            versions.remove(id);
        }
        if !released.is_empty() {
            tracing::debug!(count = released.len(), "released unreferenced bank versions");
        }
        released
    }
}

fn validate_items(run: &CalibrationRun) -> Result<(), CatError> {
    let mut seen = HashSet::new();
    for item in &run.items {
        let invalid = |reason: String| CatError::InvalidParameters {
            item_id: item.id.clone(),
            reason,
        };
        if item.id.trim().is_empty() {
            return Err(invalid("item id is empty".into()));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(invalid("duplicate item id".into()));
        }
        item.params.validate().map_err(invalid)?;
        if !(item.target_exposure > 0.0 && item.target_exposure <= 1.0) {
            return Err(invalid(format!(
                "target exposure must be in (0, 1], got {}",
                item.target_exposure
            )));
        }
    }
    Ok(())
}
