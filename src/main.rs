//! anagram-loadtest: staged load generation and SLO gating for the
//! anagram-grouping HTTP API.
//!
//! Exit codes: 0 when every threshold holds, 99 when any threshold is
//! violated, 1 on configuration or runtime errors.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

/// Load-test the anagram service and gate on latency/error thresholds
#[derive(Parser)]
#[command(name = "anagram-loadtest")]
#[command(about = "Staged load tests with k6-style thresholds for the anagram API", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: commands::LoadtestCommand,
}

/// Logs go to stderr so the summary on stdout stays machine-friendly.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.execute() {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}
