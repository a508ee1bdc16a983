//! The `adaptest simulate` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use adaptest_core::config::load_config_from;
use adaptest_core::engine::{CatEngine, EngineConfig};
use adaptest_core::model::{DegradationPolicy, EstimationMethod};
use adaptest_core::parser;
use adaptest_core::report::{SimulatedSession, SimulationReport};
use adaptest_sim::{SimulationProgress, Simulator, SimulatorConfig};

/// Arguments of the `simulate` subcommand.
pub struct SimulateArgs {
    pub bank: PathBuf,
    pub sessions: Option<usize>,
    pub parallelism: Option<usize>,
    pub seed: Option<u64>,
    pub estimator: Option<String>,
    pub max_items: Option<usize>,
    pub se_threshold: Option<f64>,
    pub degradation: Option<String>,
    pub session_reports: bool,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Console progress reporter.
struct ConsoleProgress;

impl SimulationProgress for ConsoleProgress {
    fn on_session_start(&self, _: &str, _: f64) {}

    fn on_session_complete(&self, session: &SimulatedSession) {
        tracing::debug!(
            examinee = %session.examinee_id,
            true_theta = session.true_theta,
            theta = session.result.estimate.theta,
            items = session.result.items_administered,
            "simulated session finished"
        );
    }

    fn on_session_error(&self, examinee: &str, error: &str) {
        eprintln!("  ERROR: {examinee}: {error}");
    }

    fn on_run_complete(&self, total: usize, completed: usize, failed: usize, elapsed: Duration) {
        eprintln!(
            "\nComplete: {completed}/{total} sessions, {failed} failed ({:.1}s)",
            elapsed.as_secs_f64()
        );
    }
}

pub async fn execute(args: SimulateArgs) -> Result<()> {
    let mut config = load_config_from(args.config.as_deref())?;

    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(method) = &args.estimator {
        config.estimator.method = method
            .parse::<EstimationMethod>()
            .map_err(anyhow::Error::msg)?;
    }
    if let Some(max_items) = args.max_items {
        anyhow::ensure!(max_items >= 1, "max-items must be at least 1");
        config.session.stopping.max_items = max_items;
        config.session.stopping.min_items = config.session.stopping.min_items.min(max_items);
    }
    if let Some(se) = args.se_threshold {
        anyhow::ensure!(se > 0.0, "se-threshold must be positive");
        config.session.stopping.se_threshold = se;
    }
    if let Some(policy) = &args.degradation {
        config.session.degradation = policy
            .parse::<DegradationPolicy>()
            .map_err(anyhow::Error::msg)?;
    }
    if let Some(sessions) = args.sessions {
        config.simulation.sessions = sessions;
    }
    if let Some(parallelism) = args.parallelism {
        anyhow::ensure!(parallelism >= 1, "parallelism must be at least 1");
        config.simulation.parallelism = parallelism;
    }
    let output = args.output.unwrap_or_else(|| config.output_dir.clone());

    let run = parser::parse_item_bank(&args.bank)?;
    let engine = CatEngine::new(EngineConfig::from(&config));
    let version = engine.publish(run)?;

    let mut sim_config = SimulatorConfig::from(&config);
    sim_config.keep_session_reports = args.session_reports;

    eprintln!(
        "adaptest v{}: simulating {} sessions on bank {} ({}, estimator {})",
        env!("CARGO_PKG_VERSION"),
        sim_config.sessions,
        args.bank.display(),
        version,
        config.estimator.method,
    );

    let simulator = Simulator::new(Arc::new(engine), sim_config);
    let report = simulator.run(&ConsoleProgress).await?;

    print_summary(&report);

    std::fs::create_dir_all(&output)?;
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%S");
    let path = output.join(format!("simulation-{timestamp}.json"));
    report.save_json(&path)?;
    println!("Results saved to: {}", path.display());

    if args.session_reports {
        let dir = output.join(format!("sessions-{timestamp}"));
        for session in &report.session_reports {
            session
                .save_json(&dir.join(format!("{}.json", session.session.session_id)))?;
        }
        println!("Session reports: {}", dir.display());
    }

    Ok(())
}

fn print_summary(report: &SimulationReport) {
    use comfy_table::{Cell, Table};

    let recovery = &report.recovery;
    let mut table = Table::new();
    table.set_header(vec![
        "Sessions", "Bias", "RMSE", "Corr", "Mean SE", "Mean Length",
    ]);
    table.add_row(vec![
        Cell::new(recovery.sessions),
        Cell::new(format!("{:+.3}", recovery.bias)),
        Cell::new(format!("{:.3}", recovery.rmse)),
        Cell::new(
            recovery
                .correlation
                .map(|r| format!("{r:.3}"))
                .unwrap_or_else(|| "-".into()),
        ),
        Cell::new(format!("{:.3}", recovery.mean_se)),
        Cell::new(format!("{:.1}", recovery.mean_length)),
    ]);
    println!("{table}");

    let mut outcomes = Table::new();
    outcomes.set_header(vec!["Outcome", "Sessions"]);
    for (state, count) in &recovery.outcomes {
        outcomes.add_row(vec![Cell::new(state), Cell::new(count)]);
    }
    println!("{outcomes}");

    let mut exposure: Vec<_> = report.exposure.iter().filter(|e| e.eligible > 0).collect();
    exposure.sort_by(|a, b| b.rate.total_cmp(&a.rate).then(a.item_id.cmp(&b.item_id)));

    let mut table = Table::new();
    table.set_header(vec!["Item", "Target", "Rate", "Administered", "k"]);
    for item in exposure.iter().take(10) {
        table.add_row(vec![
            Cell::new(&item.item_id),
            Cell::new(format!("{:.2}", item.target_exposure)),
            Cell::new(format!("{:.3}", item.rate)),
            Cell::new(item.administered),
            Cell::new(format!("{:.3}", item.final_k)),
        ]);
    }
    println!("{table}");

    let over = report.overexposed(0.05);
    if over.is_empty() {
        println!("No item exceeded its exposure target.");
    } else {
        println!("{} item(s) exceeded their exposure target by more than 0.05.", over.len());
    }
}
