//! `anagram-loadtest run` command implementation.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anagram_loadtest::loadtest::config::LoadTestConfig;
use anagram_loadtest::loadtest::engine::LoadTestEngine;
use anagram_loadtest::loadtest::report::{write_report, write_report_to, LoadTestReport};
use anagram_loadtest::loadtest::summary::render_summary;

use super::CommandOutcome;

/// Flags of the `run` subcommand.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub url: Option<String>,
    pub config_path: Option<PathBuf>,
    pub max_vus: Option<u32>,
    pub report_path: Option<PathBuf>,
    pub no_report: bool,
    pub no_color: bool,
    pub quiet: bool,
}

/// Execute the `run` command.
///
/// Loads config (explicit path, auto-discovery, or built-in default),
/// applies CLI overrides, runs the engine, prints the summary and writes the
/// JSON report. Threshold violations are an outcome, not an error.
pub async fn execute_run(options: RunOptions) -> Result<CommandOutcome> {
    let mut config = load_config(options.config_path.as_deref(), options.quiet)?;
    apply_overrides(&mut config, options.url, options.max_vus);

    if options.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let live_display = !options.quiet && std::io::stderr().is_terminal();
    let engine = LoadTestEngine::new(config)
        .context("Invalid load test configuration")?
        .with_live_display(live_display)
        .with_signal_handling(true);

    let result = engine.run().await.context("Load test failed")?;

    println!("{}", render_summary(&result, engine.config()));

    if !options.no_report {
        let report = LoadTestReport::from_result(&result, engine.config());
        let written = match options.report_path {
            Some(path) => write_report_to(&report, &path)
                .map(|()| path)
                .map_err(anyhow::Error::from),
            None => std::env::current_dir()
                .context("Failed to resolve current directory")
                .and_then(|cwd| Ok(write_report(&report, &cwd)?)),
        };
        // The run itself completed; a report failure must not change the verdict.
        match written {
            Ok(path) => {
                eprintln!();
                eprintln!("Report written to: {}", path.display());
            },
            Err(e) => {
                eprintln!();
                eprintln!("Warning: Failed to write report: {e:#}");
            },
        }
    }

    Ok(if result.passed() {
        CommandOutcome::Success
    } else {
        CommandOutcome::ThresholdsFailed
    })
}

fn load_config(explicit: Option<&Path>, quiet: bool) -> Result<LoadTestConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: {}\nUse `anagram-loadtest init` to create one.",
                    path.display()
                );
            }
            Some(path.to_path_buf())
        },
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| discover_config(&cwd)),
    };

    match path {
        Some(path) => {
            if !quiet {
                eprintln!("Loading config from: {}", path.display());
            }
            LoadTestConfig::load(&path)
                .with_context(|| format!("Failed to load config '{}'", path.display()))
        },
        None => {
            if !quiet {
                eprintln!("No .anagram/loadtest.toml found, using the built-in reference profile");
            }
            Ok(LoadTestConfig::default())
        },
    }
}

/// Apply CLI flag overrides to a loaded config.
fn apply_overrides(config: &mut LoadTestConfig, url: Option<String>, max_vus: Option<u32>) {
    if let Some(url) = url {
        config.settings.base_url = url;
    }
    if max_vus.is_some() {
        config.settings.max_vus = max_vus;
    }
}

/// Discover `.anagram/loadtest.toml` by walking parent directories from
/// `start`, the way `.git` is discovered.
fn discover_config(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(".anagram").join("loadtest.toml");
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anagram_loadtest::loadtest::config::DEFAULT_CONFIG_TEMPLATE;

    #[test]
    fn test_discover_config_walks_parents() {
        let root = tempfile::tempdir().unwrap();
        let config_dir = root.path().join(".anagram");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("loadtest.toml"), DEFAULT_CONFIG_TEMPLATE).unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = discover_config(&nested).unwrap();
        assert_eq!(found, config_dir.join("loadtest.toml"));
    }

    #[test]
    fn test_discover_config_does_not_panic_without_file() {
        let root = tempfile::tempdir().unwrap();
        let _ = discover_config(root.path());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = LoadTestConfig::default();
        apply_overrides(&mut config, Some("http://anagram:9000".to_string()), Some(12));
        assert_eq!(config.settings.base_url, "http://anagram:9000");
        assert_eq!(config.settings.max_vus, Some(12));

        let mut config = LoadTestConfig::default();
        apply_overrides(&mut config, None, None);
        assert_eq!(config, LoadTestConfig::default());
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        let err = load_config(Some(Path::new("/nonexistent/loadtest.toml")), true).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_load_config_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[[stage]]\nduration_secs = 3\ntarget_vus = 1\n").unwrap();
        let config = load_config(Some(&path), true).unwrap();
        assert_eq!(config.stage.len(), 1);
    }
}
