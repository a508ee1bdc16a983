//! Ingestion of parameter sets produced by the external calibration job.

use std::sync::{Arc, Mutex};

use crate::bank::ItemBank;
use crate::error::CatError;
use crate::model::{CalibrationRun, CalibrationStatus, VersionId};

/// Validates calibration runs and publishes them to the item bank.
///
/// Every run handed in is appended to the log, published or not.
#[derive(Debug)]
pub struct CalibrationIngestor {
    bank: Arc<ItemBank>,
    min_sample_size: u32,
    log: Mutex<Vec<CalibrationRun>>,
}

impl CalibrationIngestor {
    pub fn new(bank: Arc<ItemBank>, min_sample_size: u32) -> Self {
        Self {
            bank,
            min_sample_size,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Accept a run and publish it as the new current version.
    pub fn ingest(&self, mut run: CalibrationRun) -> Result<VersionId, CatError> {
        let outcome = self.check(&run).and_then(|()| self.bank.publish_version(&run));
        match &outcome {
            Ok(version) => run.published_version = Some(*version),
            Err(err @ CatError::CalibrationRejected { .. }) => {
                tracing::warn!("{err}; keeping current item bank version");
            }
            Err(err) => {
                tracing::warn!(run = %run.id, "calibration run not published: {err}");
            }
        }
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(run);
        outcome
    }

    fn check(&self, run: &CalibrationRun) -> Result<(), CatError> {
        if run.status == CalibrationStatus::Failed {
            return Err(CatError::CalibrationRejected {
                run_id: run.id,
                reason: "calibration job reported failure".into(),
            });
        }
        if run.sample_size < self.min_sample_size {
            return Err(CatError::CalibrationRejected {
                run_id: run.id,
                reason: format!(
                    "sample size {} below minimum {}",
                    run.sample_size, self.min_sample_size
                ),
            });
        }
        Ok(())
    }

    /// All runs seen so far, oldest first.
    pub fn log(&self) -> Vec<CalibrationRun> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn min_sample_size(&self) -> u32 {
        self.min_sample_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::ExposureControl;
    use crate::model::{CalibratedItem, ItemParams};

    fn items() -> Vec<CalibratedItem> {
        vec![CalibratedItem {
            id: "i1".into(),
            content_ref: String::new(),
            params: ItemParams::new(1.0, 0.0, 0.2),
            key: "A".into(),
            is_active: true,
            target_exposure: 1.0,
            tags: vec![],
        }]
    }

    fn ingestor() -> CalibrationIngestor {
        let bank = Arc::new(ItemBank::new(Arc::new(ExposureControl::default()), 1));
        CalibrationIngestor::new(bank, 200)
    }

    #[test]
    fn publishes_and_logs_accepted_run() {
        let ingestor = ingestor();
        let version = ingestor
            .ingest(CalibrationRun::completed(500, items()))
            .unwrap();
        let log = ingestor.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].published_version, Some(version));
    }

    #[test]
    fn small_sample_is_rejected_and_old_version_stays() {
        let ingestor = ingestor();
        let v1 = ingestor
            .ingest(CalibrationRun::completed(500, items()))
            .unwrap();

        let err = ingestor
            .ingest(CalibrationRun::completed(50, items()))
            .unwrap_err();
        assert!(matches!(err, CatError::CalibrationRejected { .. }));
        assert_eq!(ingestor.bank.current().unwrap().id(), v1);

        let log = ingestor.log();
        assert_eq!(log.len(), 2);
        assert!(log[1].published_version.is_none());
    }

    #[test]
    fn failed_run_is_rejected() {
        let ingestor = ingestor();
        let mut run = CalibrationRun::completed(5_000, items());
        run.status = CalibrationStatus::Failed;
        assert!(matches!(
            ingestor.ingest(run),
            Err(CatError::CalibrationRejected { .. })
        ));
    }

    #[test]
    fn invalid_parameters_pass_through() {
        let ingestor = ingestor();
        let mut bad = items();
        bad[0].params.c = 1.5;
        assert!(matches!(
            ingestor.ingest(CalibrationRun::completed(500, bad)),
            Err(CatError::InvalidParameters { .. })
        ));
    }
}
