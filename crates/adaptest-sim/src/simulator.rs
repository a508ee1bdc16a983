//! Batch simulation of adaptive sessions.
//!
//! Draws true abilities from a normal distribution, runs one session per
//! simulated test-taker against a shared engine with bounded parallelism,
//! and summarizes ability recovery and item exposure.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use uuid::Uuid;

use adaptest_core::config::AdaptestConfig;
use adaptest_core::engine::CatEngine;
use adaptest_core::model::SessionConfig;
use adaptest_core::report::{SessionReport, SimulatedSession, SimulationReport};
use adaptest_core::session::{SessionId, SessionResult, Step};
use adaptest_core::statistics::{summarize_exposure, RecoveryStats};
use adaptest_core::traits::Examinee;

use crate::error::SimulationError;
use crate::examinee::SimulatedExaminee;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Number of simulated test-takers.
    pub sessions: usize,
    /// Maximum concurrently running sessions.
    pub parallelism: usize,
    pub theta_mean: f64,
    pub theta_sd: f64,
    /// Seed for ability draws and examinee answers.
    pub seed: Option<u64>,
    /// Session settings applied to every simulated session.
    pub session: SessionConfig,
    /// Reported answer latency.
    pub latency: Duration,
    /// Attach a full [`SessionReport`] per session.
    pub keep_session_reports: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sessions: 500,
            parallelism: 4,
            theta_mean: 0.0,
            theta_sd: 1.0,
            seed: None,
            session: SessionConfig::default(),
            latency: Duration::from_secs(20),
            keep_session_reports: false,
        }
    }
}

impl From<&AdaptestConfig> for SimulatorConfig {
    fn from(config: &AdaptestConfig) -> Self {
        Self {
            sessions: config.simulation.sessions,
            parallelism: config.simulation.parallelism,
            theta_mean: config.simulation.theta_mean,
            theta_sd: config.simulation.theta_sd,
            seed: config.seed,
            session: config.session.clone(),
            ..Default::default()
        }
    }
}

/// Progress reporting trait.
pub trait SimulationProgress: Send + Sync {
    fn on_session_start(&self, examinee: &str, true_theta: f64);
    fn on_session_complete(&self, session: &SimulatedSession);
    fn on_session_error(&self, examinee: &str, error: &str);
    fn on_run_complete(&self, total: usize, completed: usize, failed: usize, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopProgress;

impl SimulationProgress for NoopProgress {
    fn on_session_start(&self, _: &str, _: f64) {}
    fn on_session_complete(&self, _: &SimulatedSession) {}
    fn on_session_error(&self, _: &str, _: &str) {}
    fn on_run_complete(&self, _: usize, _: usize, _: usize, _: Duration) {}
}

/// Runs simulated test-takers against an engine.
pub struct Simulator {
    engine: Arc<CatEngine>,
    config: SimulatorConfig,
}

impl Simulator {
    pub fn new(engine: Arc<CatEngine>, config: SimulatorConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<CatEngine> {
        &self.engine
    }

    /// Run every simulated session and build the report.
    pub async fn run(&self, progress: &dyn SimulationProgress) -> Result<SimulationReport> {
        if self.config.parallelism == 0 {
            return Err(SimulationError::InvalidConfig("parallelism must be at least 1".into()).into());
        }
        let normal = Normal::new(self.config.theta_mean, self.config.theta_sd)
            .map_err(|e| SimulationError::InvalidConfig(format!("ability distribution: {e}")))?;

        let start = Instant::now();
        let bank = self.engine.bank().current()?;
        let bank_version = bank.id();
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut futures = FuturesUnordered::new();

        for n in 0..self.config.sessions {
            let examinee_id = format!("sim-{n:05}");
            let true_theta = normal.sample(&mut rng);
            let examinee = SimulatedExaminee::new(
                examinee_id.clone(),
                true_theta,
                Arc::clone(&bank),
                rng.gen(),
            )
            .with_latency(self.config.latency);
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            let session_config = self.config.session.clone();
            let keep_report = self.config.keep_session_reports;

            futures.push(async move {
                let inner = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| anyhow::anyhow!("semaphore closed"))?;
                    progress.on_session_start(&examinee_id, true_theta);
                    let (result, report) =
                        run_session(&engine, &examinee, session_config, keep_report).await?;
                    Ok::<_, anyhow::Error>((
                        SimulatedSession {
                            examinee_id: examinee_id.clone(),
                            true_theta,
                            result,
                        },
                        report,
                    ))
                };
                (examinee_id.clone(), inner.await)
            });
        }

        let mut sessions = Vec::new();
        let mut session_reports = Vec::new();
        let mut completed = 0usize;
        let mut failed = 0usize;
        let total = futures.len();

        while let Some((examinee_id, outcome)) = futures.next().await {
            match outcome {
                Ok((session, report)) => {
                    progress.on_session_complete(&session);
                    sessions.push(session);
                    session_reports.extend(report);
                    completed += 1;
                }
                Err(e) => {
                    tracing::error!("simulated session failed for {examinee_id}: {e:#}");
                    progress.on_session_error(&examinee_id, &e.to_string());
                    failed += 1;
                }
            }
        }
        self.engine.evict_closed();

        let elapsed = start.elapsed();
        progress.on_run_complete(total, completed, failed, elapsed);

        sessions.sort_by(|a, b| a.examinee_id.cmp(&b.examinee_id));
        session_reports.sort_by(|a, b| a.session.test_taker.cmp(&b.session.test_taker));

        let exposure_control = self.engine.exposure();
        let mut records = exposure_control.history();
        records.extend(exposure_control.snapshot());
        let from_epoch = u64::from(exposure_control.epoch() > 0);

        Ok(SimulationReport {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            bank_version,
            seed: self.config.seed,
            recovery: RecoveryStats::compute(&sessions),
            exposure: summarize_exposure(&records, from_epoch),
            sessions,
            session_reports,
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}

/// Drive one session to a terminal state.
///
/// Each answer is awaited no longer than the item timeout or the time left
/// under the session limit, whichever is sooner; past that the session is
/// expired as a timeout. If the examinee fails mid-test the session is
/// aborted. Either way the partial result is returned.
async fn run_session(
    engine: &CatEngine,
    examinee: &dyn Examinee,
    config: SessionConfig,
    keep_report: bool,
) -> Result<(SessionResult, Option<SessionReport>)> {
    let item_timeout = config.stopping.item_timeout_secs.map(Duration::from_secs);
    let session_deadline = config
        .stopping
        .time_limit_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let started = engine.start_session(examinee.id(), config)?;
    let session_id = started.session_id;
    let mut step = started.step;

    let result = loop {
        let item = match step {
            Step::Finished(result) => break result,
            Step::NextItem(item) => item,
        };

        let item_deadline = item_timeout.map(|limit| Instant::now() + limit);
        let deadline = match (item_deadline, session_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let response = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, examinee.respond(&item)).await {
                    Ok(response) => response,
                    Err(_) => {
                        tracing::warn!(
                            session = %session_id,
                            item = %item.item_id,
                            "no answer before deadline"
                        );
                        break expire_or_current(engine, session_id)?;
                    }
                }
            }
            None => examinee.respond(&item).await,
        };

        match response {
            Ok(answer) => {
                let submitted = engine.submit_response(
                    session_id,
                    &item.item_id,
                    &answer.answer,
                    answer.latency,
                );
                match submitted {
                    Ok(next) => step = next,
                    Err(e) if e.is_terminal() => {
                        tracing::debug!(session = %session_id, "session closed while answering: {e}");
                        break engine.session_result(session_id)?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => {
                tracing::warn!(session = %session_id, "examinee failed, aborting session: {e:#}");
                break engine.abort_session(session_id)?;
            }
        }
    };

    let report = if keep_report {
        Some(engine.session_report(session_id)?)
    } else {
        None
    };
    Ok((result, report))
}

/// Expire a session, or take its result if something else already closed it.
fn expire_or_current(engine: &CatEngine, session_id: SessionId) -> Result<SessionResult> {
    match engine.expire_session(session_id) {
        Ok(result) => Ok(result),
        Err(e) if e.is_terminal() => Ok(engine.session_result(session_id)?),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptest_core::engine::EngineConfig;
    use adaptest_core::exposure::ExposureConfig;
    use adaptest_core::model::{CalibratedItem, CalibrationRun, ItemParams, StoppingRule};
    use adaptest_core::session::{CompletionReason, PresentedItem, SessionState, TerminationReason};
    use adaptest_core::traits::ExamineeAnswer;
    use async_trait::async_trait;

    fn engine(items: usize) -> Arc<CatEngine> {
        let engine = CatEngine::new(EngineConfig {
            exposure: ExposureConfig {
                baseline_sessions: 20,
                epoch_sessions: 20,
                ..Default::default()
            },
            min_active_items: 1,
            min_sample_size: 1,
            seed: Some(77),
            ..Default::default()
        });
        let bank = (0..items)
            .map(|i| CalibratedItem {
                id: format!("item-{i:03}"),
                content_ref: String::new(),
                params: ItemParams::new(
                    1.0 + 0.1 * (i % 5) as f64,
                    -3.0 + 6.0 * i as f64 / items as f64,
                    0.15,
                ),
                key: "A".into(),
                is_active: true,
                target_exposure: 0.4,
                tags: vec![],
            })
            .collect();
        engine
            .publish(CalibrationRun::completed(1_000, bank))
            .unwrap();
        Arc::new(engine)
    }

    fn config(sessions: usize) -> SimulatorConfig {
        SimulatorConfig {
            sessions,
            parallelism: 8,
            seed: Some(1234),
            session: SessionConfig {
                stopping: StoppingRule {
                    max_items: 20,
                    min_items: 5,
                    se_threshold: 0.35,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn recovers_abilities() {
        let simulator = Simulator::new(engine(60), config(120));
        let report = simulator.run(&NoopProgress).await.unwrap();

        assert_eq!(report.sessions.len(), 120);
        assert_eq!(report.recovery.sessions, 120);
        assert!(report.recovery.bias.abs() < 0.25, "bias {}", report.recovery.bias);
        assert!(report.recovery.rmse < 0.7, "rmse {}", report.recovery.rmse);
        assert!(report.recovery.correlation.unwrap() > 0.8);
        assert!(report.recovery.mean_length <= 20.0);
        assert_eq!(simulator.engine().session_count(), 0, "closed sessions evicted");
    }

    #[tokio::test]
    async fn no_session_repeats_an_item() {
        let simulator = Simulator::new(
            engine(30),
            SimulatorConfig {
                keep_session_reports: true,
                ..config(40)
            },
        );
        let report = simulator.run(&NoopProgress).await.unwrap();
        assert_eq!(report.session_reports.len(), 40);
        for session in &report.session_reports {
            let mut ids = session.session.administered.clone();
            let len = ids.len();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), len);
            assert!(session.replay().unwrap().matches(1e-9));
        }
    }

    #[tokio::test]
    async fn exposure_counters_stay_consistent() {
        let simulator = Simulator::new(engine(40), config(100));
        let report = simulator.run(&NoopProgress).await.unwrap();
        assert!(!report.exposure.is_empty());
        for item in &report.exposure {
            assert!(item.administered <= item.eligible, "{item:?}");
        }
    }

    #[tokio::test]
    async fn same_seed_same_abilities() {
        let a = Simulator::new(engine(30), config(10))
            .run(&NoopProgress)
            .await
            .unwrap();
        let b = Simulator::new(engine(30), config(10))
            .run(&NoopProgress)
            .await
            .unwrap();
        let thetas = |r: &SimulationReport| -> Vec<f64> {
            r.sessions.iter().map(|s| s.true_theta).collect()
        };
        assert_eq!(thetas(&a), thetas(&b));
    }

    #[tokio::test]
    async fn zero_parallelism_is_rejected() {
        let simulator = Simulator::new(
            engine(10),
            SimulatorConfig {
                parallelism: 0,
                ..config(1)
            },
        );
        assert!(simulator.run(&NoopProgress).await.is_err());
    }

    struct Disconnecting;

    #[async_trait]
    impl Examinee for Disconnecting {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn respond(&self, _: &PresentedItem) -> anyhow::Result<ExamineeAnswer> {
            anyhow::bail!("connection dropped")
        }
    }

    #[tokio::test]
    async fn failing_examinee_aborts_session() {
        let engine = engine(10);
        let (result, report) = run_session(&engine, &Disconnecting, SessionConfig::default(), true)
            .await
            .unwrap();
        assert_eq!(result.state, SessionState::Terminated(TerminationReason::Aborted));
        assert_eq!(result.items_administered, 0);
        assert_eq!(report.unwrap().session.administered.len(), 1);
    }

    /// Never answers.
    struct Silent;

    #[async_trait]
    impl Examinee for Silent {
        fn id(&self) -> &str {
            "silent"
        }

        async fn respond(&self, _: &PresentedItem) -> anyhow::Result<ExamineeAnswer> {
            futures::future::pending().await
        }
    }

    /// Answers correctly after a fixed delay.
    struct Slow(Duration);

    #[async_trait]
    impl Examinee for Slow {
        fn id(&self) -> &str {
            "slow"
        }

        async fn respond(&self, _: &PresentedItem) -> anyhow::Result<ExamineeAnswer> {
            tokio::time::sleep(self.0).await;
            Ok(ExamineeAnswer {
                answer: "A".into(),
                latency: self.0,
            })
        }
    }

    fn timed(item_timeout_secs: Option<u64>, time_limit_secs: Option<u64>) -> SessionConfig {
        SessionConfig {
            stopping: StoppingRule {
                item_timeout_secs,
                time_limit_secs,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_item_times_out() {
        let engine = engine(10);
        let begin = tokio::time::Instant::now();
        let (result, report) = run_session(&engine, &Silent, timed(Some(1), Some(60)), true)
            .await
            .unwrap();

        assert_eq!(result.state, SessionState::Terminated(TerminationReason::Timeout));
        assert_eq!(result.items_administered, 0);
        assert_eq!(begin.elapsed(), Duration::from_secs(1));
        assert_eq!(report.unwrap().session.administered.len(), 1);
        assert_eq!(engine.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_time_limit_cuts_off_pending_answer() {
        let engine = engine(10);
        let begin = tokio::time::Instant::now();
        let (result, _) = run_session(
            &engine,
            &Slow(Duration::from_secs(2)),
            timed(None, Some(5)),
            false,
        )
        .await
        .unwrap();

        assert_eq!(result.state, SessionState::Terminated(TerminationReason::Timeout));
        assert_eq!(result.items_administered, 2, "answers at 2s and 4s are scored");
        assert_eq!(begin.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn answers_within_item_timeout_are_scored() {
        let engine = engine(10);
        let mut session = timed(Some(3), None);
        session.stopping.max_items = 4;
        let (result, _) = run_session(&engine, &Slow(Duration::from_secs(2)), session, false)
            .await
            .unwrap();

        assert_eq!(result.state, SessionState::Completed(CompletionReason::MaxItems));
        assert_eq!(result.items_administered, 4);
    }

    #[tokio::test]
    async fn session_closed_elsewhere_returns_its_result() {
        let engine = engine(10);
        let started = engine.start_session("t", SessionConfig::default()).unwrap();
        engine.abort_session(started.session_id).unwrap();

        let result = expire_or_current(&engine, started.session_id).unwrap();
        assert_eq!(result.state, SessionState::Terminated(TerminationReason::Aborted));
    }
}
