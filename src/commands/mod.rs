//! `anagram-loadtest` CLI subcommands.
//!
//! Provides `run` (execute a load test) and `init` (generate starter config).

mod init;
mod run;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;
use std::process::ExitCode;

/// k6's exit code for a run whose thresholds failed.
pub const THRESHOLD_FAILURE_EXIT_CODE: u8 = 99;

/// How a successfully executed command should end the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    ThresholdsFailed,
}

impl CommandOutcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::ThresholdsFailed => ExitCode::from(THRESHOLD_FAILURE_EXIT_CODE),
        }
    }
}

/// Load test commands for the anagram service.
#[derive(Debug, Subcommand)]
pub enum LoadtestCommand {
    /// Run a staged load test against the anagram service
    ///
    /// Uses .anagram/loadtest.toml (auto-discovered in parent directories),
    /// an explicit --config file, or the built-in reference profile. Prints
    /// a k6-style summary and writes a JSON report to .anagram/reports/.
    Run {
        /// Base URL of the anagram service (overrides config)
        #[arg(long, env = "ANAGRAM_LOADTEST_URL")]
        url: Option<String>,

        /// Path to config file (default: auto-discover .anagram/loadtest.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cap on simultaneously live virtual users (overrides config)
        #[arg(long)]
        max_vus: Option<u32>,

        /// Write the JSON report to this path instead of .anagram/reports/
        #[arg(long, conflicts_with = "no_report")]
        report: Option<PathBuf>,

        /// Disable JSON report output
        #[arg(long)]
        no_report: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Hide the live progress line
        #[arg(long, short)]
        quiet: bool,
    },

    /// Generate a starter loadtest config file
    ///
    /// Creates .anagram/loadtest.toml reproducing the reference profile.
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

impl LoadtestCommand {
    /// Execute the selected subcommand.
    pub fn execute(self) -> Result<CommandOutcome> {
        match self {
            LoadtestCommand::Run {
                url,
                config,
                max_vus,
                report,
                no_report,
                no_color,
                quiet,
            } => {
                let options = run::RunOptions {
                    url,
                    config_path: config,
                    max_vus,
                    report_path: report,
                    no_report,
                    no_color,
                    quiet,
                };
                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(run::execute_run(options))
            },
            LoadtestCommand::Init { force } => {
                let cwd = std::env::current_dir()?;
                init::execute_init(&cwd, force)?;
                Ok(CommandOutcome::Success)
            },
        }
    }
}
