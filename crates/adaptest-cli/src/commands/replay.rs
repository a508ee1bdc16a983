//! The `adaptest replay` command.
//!
//! Accepts either a single session report or a simulation report carrying
//! session reports, and re-estimates every session from its response log.

use std::path::PathBuf;

use anyhow::{Context, Result};

use adaptest_core::report::{SessionReport, SimulationReport};

pub fn execute(report_path: PathBuf, tolerance: f64) -> Result<()> {
    anyhow::ensure!(tolerance >= 0.0, "tolerance must not be negative");

    let sessions = match SessionReport::load_json(&report_path) {
        Ok(report) => vec![report],
        Err(session_err) => {
            let simulation = SimulationReport::load_json(&report_path).with_context(|| {
                format!("not a session report either: {session_err:#}")
            })?;
            anyhow::ensure!(
                !simulation.session_reports.is_empty(),
                "simulation report has no session reports; rerun simulate with --session-reports"
            );
            simulation.session_reports
        }
    };

    let mut mismatches = 0usize;
    for report in &sessions {
        let check = report.replay()?;
        let id = report.session.session_id;
        if check.matches(tolerance) {
            println!(
                "  OK    {id}  theta {:+.4}  se {:.4}  ({} responses)",
                check.replayed.theta,
                check.replayed.se,
                report.responses.len()
            );
        } else {
            mismatches += 1;
            println!(
                "  FAIL  {id}  recorded theta {:+.6} se {:.6}, replayed theta {:+.6} se {:.6}",
                check.recorded.theta, check.recorded.se, check.replayed.theta, check.replayed.se
            );
        }
    }

    if mismatches > 0 {
        anyhow::bail!(
            "{mismatches} of {} session(s) did not reproduce their recorded estimate",
            sessions.len()
        );
    }
    println!("Replay OK: {} session(s) reproduced.", sessions.len());
    Ok(())
}
