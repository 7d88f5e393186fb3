//! `anagram-loadtest init` command implementation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use anagram_loadtest::loadtest::config::DEFAULT_CONFIG_TEMPLATE;

/// Execute the `init` command.
///
/// Creates `.anagram/loadtest.toml` under `base_dir` with the reference
/// profile. Refuses to overwrite an existing file unless `force` is set.
pub fn execute_init(base_dir: &Path, force: bool) -> Result<PathBuf> {
    let config_dir = base_dir.join(".anagram");
    let config_path = config_dir.join("loadtest.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}\n\
             Use `--force` to overwrite.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    eprintln!("Created {}", config_path.display());
    eprintln!("Edit the stages and thresholds to fit your service, then run `anagram-loadtest run`.");
    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anagram_loadtest::loadtest::config::LoadTestConfig;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = execute_init(dir.path(), false).unwrap();
        assert_eq!(path, dir.path().join(".anagram").join("loadtest.toml"));
        let config = LoadTestConfig::load(&path).unwrap();
        assert_eq!(config, LoadTestConfig::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        execute_init(dir.path(), false).unwrap();
        let err = execute_init(dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_init_force_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = execute_init(dir.path(), false).unwrap();
        std::fs::write(&path, "garbage").unwrap();
        execute_init(dir.path(), true).unwrap();
        assert!(LoadTestConfig::load(&path).is_ok());
    }
}
