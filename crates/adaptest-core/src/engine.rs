//! Central CAT engine.
//!
//! Owns the item bank, exposure control and estimator, and keeps every
//! live session in a concurrent map. Each session sits behind its own
//! mutex, so sessions proceed independently; the only state they share
//! is the exposure arena, which is lock-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bank::ItemBank;
use crate::calibration::CalibrationIngestor;
use crate::error::CatError;
use crate::estimator::{AbilityEstimator, EstimatorConfig};
use crate::exposure::{ExposureConfig, ExposureControl};
use crate::model::{AbilityEstimate, CalibrationRun, Response, SessionConfig, VersionId};
use crate::report::SessionReport;
use crate::session::{self, SessionId, SessionResult, SessionSummary, Step, TestSession};
use crate::traits::{Clock, SystemClock};

/// Configuration for the CAT engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub estimator: EstimatorConfig,
    pub exposure: ExposureConfig,
    /// Publishing fails below this many active items.
    pub min_active_items: usize,
    /// Calibration runs fitted on fewer responses are rejected.
    pub min_sample_size: u32,
    /// Seed for per-session exposure draws; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            exposure: ExposureConfig::default(),
            min_active_items: 5,
            min_sample_size: 200,
            seed: None,
        }
    }
}

/// Returned by [`CatEngine::start_session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStarted {
    pub session_id: SessionId,
    pub step: Step,
}

/// The central CAT engine.
pub struct CatEngine {
    config: EngineConfig,
    bank: Arc<ItemBank>,
    exposure: Arc<ExposureControl>,
    calibration: CalibrationIngestor,
    estimator: AbilityEstimator,
    sessions: DashMap<SessionId, Arc<Mutex<TestSession>>>,
    clock: Arc<dyn Clock>,
    session_seq: AtomicU64,
}

impl CatEngine {
    pub fn new(config: EngineConfig) -> Self {
        let exposure = Arc::new(ExposureControl::new(config.exposure.clone()));
        let bank = Arc::new(ItemBank::new(Arc::clone(&exposure), config.min_active_items));
        let calibration = CalibrationIngestor::new(Arc::clone(&bank), config.min_sample_size);
        let estimator = AbilityEstimator::new(config.estimator.clone());
        Self {
            config,
            bank,
            exposure,
            calibration,
            estimator,
            sessions: DashMap::new(),
            clock: Arc::new(SystemClock),
            session_seq: AtomicU64::new(0),
        }
    }

    /// Replace the wall clock (for tests and simulations).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bank(&self) -> &Arc<ItemBank> {
        &self.bank
    }

    pub fn exposure(&self) -> &Arc<ExposureControl> {
        &self.exposure
    }

    pub fn calibration(&self) -> &CalibrationIngestor {
        &self.calibration
    }

    pub fn estimator(&self) -> &AbilityEstimator {
        &self.estimator
    }

    /// Ingest a calibration run and publish it for new sessions.
    pub fn publish(&self, run: CalibrationRun) -> Result<VersionId, CatError> {
        self.calibration.ingest(run)
    }

    /// Start a session on the current bank version and present its first item.
    pub fn start_session(
        &self,
        test_taker: &str,
        config: SessionConfig,
    ) -> Result<SessionStarted, CatError> {
        let bank = self.bank.current()?;
        self.exposure.begin_session();

        let seq = self.session_seq.fetch_add(1, Ordering::Relaxed);
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(seq)),
            None => StdRng::from_entropy(),
        };

        let session_id = Uuid::new_v4();
        let now = self.clock.now();
        let version = bank.id();
        let mut session = TestSession::new(session_id, test_taker, bank, config, rng, now);
        let step = session.start(now)?;
        self.sessions
            .insert(session_id, Arc::new(Mutex::new(session)));

        tracing::debug!(session = %session_id, test_taker, version = %version, "session started");
        Ok(SessionStarted { session_id, step })
    }

    /// Score a response and return the next item or the final result.
    pub fn submit_response(
        &self,
        session_id: SessionId,
        item_id: &str,
        answer: &str,
        latency: Duration,
    ) -> Result<Step, CatError> {
        let session = self.session(session_id)?;
        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
        session.submit(item_id, answer, latency, self.clock.now(), &self.estimator)
    }

    pub fn get_session_state(&self, session_id: SessionId) -> Result<SessionSummary, CatError> {
        self.with_session(session_id, |s| s.summary())
    }

    /// Current result of a session, best-effort if it is still running.
    pub fn session_result(&self, session_id: SessionId) -> Result<SessionResult, CatError> {
        self.with_session(session_id, |s| s.result())
    }

    /// Abort a session (e.g. the test-taker disconnected).
    pub fn abort_session(&self, session_id: SessionId) -> Result<SessionResult, CatError> {
        let session = self.session(session_id)?;
        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
        session.abort(self.clock.now())
    }

    /// Terminate a session whose pending response did not arrive in time.
    pub fn expire_session(&self, session_id: SessionId) -> Result<SessionResult, CatError> {
        let session = self.session(session_id)?;
        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
        session.expire(self.clock.now())
    }

    /// The append-only response log of a session.
    pub fn session_log(&self, session_id: SessionId) -> Result<Vec<Response>, CatError> {
        self.with_session(session_id, |s| s.responses().to_vec())
    }

    pub fn session_report(&self, session_id: SessionId) -> Result<SessionReport, CatError> {
        self.with_session(session_id, |s| {
            SessionReport::new(
                s.summary(),
                s.responses().to_vec(),
                s.administered_items(),
                self.estimator.config().clone(),
            )
        })
    }

    /// Re-estimate a session from scratch from its response log.
    pub fn replay_session(&self, session_id: SessionId) -> Result<AbilityEstimate, CatError> {
        let session = self.session(session_id)?;
        let session = session.lock().unwrap_or_else(|e| e.into_inner());
        session::replay(session.responses(), session.bank().items(), &self.estimator)
    }

    /// Terminate sessions whose pending item or time budget has expired.
    pub fn reap_timeouts(&self) -> Vec<SessionId> {
        let now = self.clock.now();
        let timed_out: Vec<SessionId> = self
            .snapshot_sessions()
            .into_iter()
            .filter_map(|(id, session)| {
                let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                session.check_timeout(now).then_some(id)
            })
            .collect();
        if !timed_out.is_empty() {
            tracing::info!(count = timed_out.len(), "terminated timed-out sessions");
        }
        timed_out
    }

    /// Remove terminal sessions from memory, returning their results.
    /// Bank versions they pinned become eligible for release.
    pub fn evict_closed(&self) -> Vec<SessionResult> {
        let mut evicted = Vec::new();
        self.sessions.retain(|_, session| {
            let session = session.lock().unwrap_or_else(|e| e.into_inner());
            if session.state().is_terminal() {
                evicted.push(session.result());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Number of sessions held in memory.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of sessions not yet in a terminal state.
    pub fn active_sessions(&self) -> usize {
        self.snapshot_sessions()
            .into_iter()
            .filter(|(_, s)| {
                !s.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .state()
                    .is_terminal()
            })
            .count()
    }

    fn session(&self, session_id: SessionId) -> Result<Arc<Mutex<TestSession>>, CatError> {
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(CatError::SessionNotFound(session_id))
    }

    fn with_session<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&TestSession) -> T,
    ) -> Result<T, CatError> {
        let session = self.session(session_id)?;
        let session = session.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&session))
    }

    fn snapshot_sessions(&self) -> Vec<(SessionId, Arc<Mutex<TestSession>>)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }
}
