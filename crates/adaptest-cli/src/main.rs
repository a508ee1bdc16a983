//! adaptest CLI — the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "adaptest", version, about = "Computerized adaptive testing engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated test-takers against an item bank
    Simulate {
        /// Path to .toml item bank
        #[arg(long)]
        bank: PathBuf,

        /// Number of simulated test-takers
        #[arg(long)]
        sessions: Option<usize>,

        /// Max concurrent sessions
        #[arg(long)]
        parallelism: Option<usize>,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Ability estimator: eap or mle
        #[arg(long)]
        estimator: Option<String>,

        /// Maximum items per session
        #[arg(long)]
        max_items: Option<usize>,

        /// Stop once the standard error falls to this value
        #[arg(long)]
        se_threshold: Option<f64>,

        /// What to do when exposure control rejects every item: administer-best or terminate
        #[arg(long)]
        degradation: Option<String>,

        /// Also write a replayable report per session
        #[arg(long)]
        session_reports: bool,

        /// Output directory
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate item bank TOML files
    Validate {
        /// Path to item bank file or directory
        #[arg(long)]
        bank: PathBuf,
    },

    /// Re-estimate sessions from a saved report and check the result
    Replay {
        /// Session or simulation report JSON
        #[arg(long)]
        report: PathBuf,

        /// Allowed difference in theta and SE
        #[arg(long, default_value = "1e-9")]
        tolerance: f64,
    },

    /// Create starter config and example item bank
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adaptest=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            bank,
            sessions,
            parallelism,
            seed,
            estimator,
            max_items,
            se_threshold,
            degradation,
            session_reports,
            output,
            config,
        } => {
            commands::simulate::execute(commands::simulate::SimulateArgs {
                bank,
                sessions,
                parallelism,
                seed,
                estimator,
                max_items,
                se_threshold,
                degradation,
                session_reports,
                output,
                config,
            })
            .await
        }
        Commands::Validate { bank } => commands::validate::execute(bank),
        Commands::Replay { report, tolerance } => commands::replay::execute(report, tolerance),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
