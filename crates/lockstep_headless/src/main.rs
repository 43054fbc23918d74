//! Headless session runner.
//!
//! Runs sessions without graphics for CI, replay verification and
//! determinism batches.
//!
//! # Usage
//!
//! ```bash
//! # Run the bundled skirmish for one minute of game time
//! cargo run -p lockstep_headless -- run --ticks 2400
//!
//! # Record and verify a replay
//! cargo run -p lockstep_headless -- run --ticks 2400 --replay out/skirmish.replay
//! cargo run -p lockstep_headless -- verify --replay out/skirmish.replay
//!
//! # Run 16 copies in parallel and compare final hashes
//! cargo run -p lockstep_headless -- batch --runs 16 --ticks 4800
//! ```
//!
//! Reports go to stdout as JSON; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lockstep_headless::{
    run_batch, run_session, scenario::default_content_dir, verify_replay, BatchConfig, RunConfig,
    Scenario, ScenarioError,
};

#[derive(Parser)]
#[command(name = "lockstep_headless")]
#[command(about = "Headless lockstep session runner for CI and determinism checks")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single session and print its metrics
    Run {
        #[command(flatten)]
        content: ContentArgs,

        /// Ticks to simulate
        #[arg(short, long, default_value = "2400")]
        ticks: u64,

        /// Record a replay to this file
        #[arg(short, long)]
        replay: Option<PathBuf>,
    },

    /// Replay a recorded session and compare its final hash
    Verify {
        /// Replay file path
        #[arg(short, long)]
        replay: PathBuf,

        /// Content directory to check the replay against
        #[arg(short, long)]
        content: Option<PathBuf>,
    },

    /// Run the same session several times in parallel and compare hashes
    Batch {
        #[command(flatten)]
        content: ContentArgs,

        /// Number of runs
        #[arg(short, long, default_value = "8")]
        runs: u32,

        /// Ticks per run
        #[arg(short, long, default_value = "2400")]
        ticks: u64,

        /// Maximum parallel runs (0 = auto)
        #[arg(short, long, default_value = "0")]
        parallel: u32,

        /// Write the JSON results here as well as to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct ContentArgs {
    /// Content directory with settings.ron, tech.ron and map.ron
    #[arg(short, long)]
    content: Option<PathBuf>,

    /// Settings file, overriding the one in the content directory
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl ContentArgs {
    fn load(&self) -> Result<Scenario, ScenarioError> {
        let dir = self.content.clone().unwrap_or_else(default_content_dir);
        match &self.settings {
            Some(settings) => Scenario::load_files(
                settings,
                &dir.join(lockstep_headless::scenario::TECH_FILE),
                &dir.join(lockstep_headless::scenario::MAP_FILE),
            ),
            None => Scenario::load(dir),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON report.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    match execute(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("FATAL: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run a subcommand. `Ok(false)` means it ran but the check failed.
fn execute(command: Commands) -> Result<bool, ScenarioError> {
    match command {
        Commands::Run {
            content,
            ticks,
            replay,
        } => {
            let scenario = content.load()?;
            let mut config = RunConfig::new(ticks);
            if let Some(path) = replay {
                config = config.with_replay(path);
            }
            print_json(&run_session(&scenario, &config)?)?;
            Ok(true)
        }
        Commands::Verify { replay, content } => {
            let scenario = content.map(Scenario::load).transpose()?;
            let report = verify_replay(&replay, scenario.as_ref())?;
            print_json(&report)?;
            Ok(report.verified && report.content_matches != Some(false))
        }
        Commands::Batch {
            content,
            runs,
            ticks,
            parallel,
            output,
        } => {
            let scenario = content.load()?;
            let results = run_batch(&scenario, BatchConfig::new(runs, ticks).with_parallel(parallel));
            if let Some(path) = output {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, serde_json::to_string_pretty(&results)?)?;
                tracing::info!(path = %path.display(), "batch results saved");
            }
            print_json(&results)?;
            Ok(results.deterministic)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ScenarioError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
