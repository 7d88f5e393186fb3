//! TOML-based load test configuration.
//!
//! Defines typed structs for the stage ramp profile, the request payload,
//! per-run settings, and threshold declarations. Every section has defaults
//! that reproduce the reference anagram profile, so an empty file (or no
//! file at all) yields a runnable configuration.
//!
//! # Example TOML
//!
//! ```toml
//! [settings]
//! base_url = "http://localhost:8080"
//! timeout_ms = 60000
//!
//! [payload]
//! words = ["кот", "ток", "рост", "торс"]
//! case_sensitive = false
//!
//! [[stage]]
//! duration_secs = 30
//! target_vus = 15
//!
//! [[stage]]
//! duration_secs = 30
//! target_vus = 0
//!
//! [thresholds]
//! http_req_duration = ["p(95)<1000"]
//! errors = ["rate<0.01"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::loadtest::error::LoadTestError;
use crate::loadtest::metrics::builtin_metric_kind;
use crate::loadtest::threshold::Threshold;

/// A load-shaping stage defining a target VU count and duration.
///
/// Stages are defined as `[[stage]]` blocks. The scheduler linearly ramps
/// from the previous stage's target (or `settings.start_vus`) to
/// `target_vus` over `duration_secs`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Duration of this stage in seconds.
    pub duration_secs: u64,
    /// Target number of virtual users at the end of this stage.
    pub target_vus: u32,
}

impl Stage {
    pub fn new(duration_secs: u64, target_vus: u32) -> Self {
        Self {
            duration_secs,
            target_vus,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// Top-level load test configuration parsed from a TOML file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoadTestConfig {
    /// General execution settings.
    #[serde(default)]
    pub settings: Settings,
    /// Wordlist and flags sent by every iteration.
    #[serde(default)]
    pub payload: PayloadConfig,
    /// Ordered load-shaping stages.
    ///
    /// The field name is `stage` (not `stages`) because TOML `[[stage]]`
    /// array-of-tables syntax creates a key called `stage`.
    #[serde(default = "default_stages")]
    pub stage: Vec<Stage>,
    /// Threshold declarations: metric name to a list of expressions.
    #[serde(default = "default_thresholds")]
    pub thresholds: BTreeMap<String, Vec<String>>,
}

/// General load test settings controlling execution parameters.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the anagram service. Overridden by `--url`.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Pause between a successful upload and the result poll (ms).
    pub poll_delay_ms: u64,
    /// Pause at the end of every iteration (ms).
    pub cooldown_ms: u64,
    /// How often the scheduler reconciles live slots with the ramp target (ms).
    pub reconcile_interval_ms: u64,
    /// VU level the first stage ramps from.
    pub start_vus: u32,
    /// Hard cap on live VUs; the scheduler stops spawning at this level.
    pub max_vus: Option<u32>,
    /// Issue the group request concurrently with upload/poll.
    pub concurrent_group: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 60_000,
            poll_delay_ms: 200,
            cooldown_ms: 200,
            reconcile_interval_ms: 100,
            start_vus: 0,
            max_vus: None,
            concurrent_group: false,
        }
    }
}

impl Settings {
    /// Convert the `timeout_ms` field to a [`Duration`].
    pub fn timeout_as_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

/// Wordlist payload shared by the upload and group requests.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PayloadConfig {
    /// Words sent in the uploaded file and in the group request body.
    pub words: Vec<String>,
    /// Value of the `case_sensitive` flag on both requests.
    pub case_sensitive: bool,
    /// File name attached to the multipart `file` field.
    pub file_name: String,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            words: ["кот", "ток", "рост", "торс"]
                .iter()
                .map(|w| (*w).to_string())
                .collect(),
            case_sensitive: false,
            file_name: "words.txt".to_string(),
        }
    }
}

impl PayloadConfig {
    /// Newline-separated wordlist with a trailing newline, as uploaded.
    pub fn wordlist_file(&self) -> String {
        let mut content = String::new();
        for word in &self.words {
            content.push_str(word);
            content.push('\n');
        }
        content
    }

    /// Multipart form value for the `case_sensitive` field.
    pub fn case_sensitive_field(&self) -> &'static str {
        if self.case_sensitive {
            "true"
        } else {
            "false"
        }
    }
}

fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new(30, 15),
        Stage::new(30, 20),
        Stage::new(60, 50),
        Stage::new(30, 0),
    ]
}

fn default_thresholds() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "http_req_duration".to_string(),
            vec!["p(95)<1000".to_string()],
        ),
        ("http_req_failed".to_string(), vec!["rate<0.01".to_string()]),
        ("errors".to_string(), vec!["rate<0.01".to_string()]),
    ])
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            payload: PayloadConfig::default(),
            stage: default_stages(),
            thresholds: default_thresholds(),
        }
    }
}

/// Commented starter config written by `anagram-loadtest init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# anagram-loadtest configuration
#
# Stages ramp the number of virtual users linearly; thresholds decide the
# exit code (0 = pass, 99 = threshold violated).

[settings]
base_url = "http://localhost:8080"
timeout_ms = 60000
poll_delay_ms = 200
cooldown_ms = 200
reconcile_interval_ms = 100
start_vus = 0
# max_vus = 200
concurrent_group = false

[payload]
words = ["кот", "ток", "рост", "торс"]
case_sensitive = false
file_name = "words.txt"

[[stage]]
duration_secs = 30
target_vus = 15

[[stage]]
duration_secs = 30
target_vus = 20

[[stage]]
duration_secs = 60
target_vus = 50

[[stage]]
duration_secs = 30
target_vus = 0

[thresholds]
http_req_duration = ["p(95)<1000"]
http_req_failed = ["rate<0.01"]
errors = ["rate<0.01"]
"#;

impl LoadTestConfig {
    /// Parse a TOML string into a validated [`LoadTestConfig`].
    pub fn from_toml(content: &str) -> Result<Self, LoadTestError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a [`LoadTestConfig`] from a file path.
    ///
    /// Returns [`LoadTestError::ConfigIo`] if the file cannot be read,
    /// [`LoadTestError::ConfigParse`] if the TOML is malformed, or
    /// [`LoadTestError::ConfigValidation`] if validation fails.
    pub fn load(path: &Path) -> Result<Self, LoadTestError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadTestError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Returns the sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.stage.iter().map(Stage::duration).sum()
    }

    /// Highest VU target across all stages (and the start level).
    pub fn peak_target_vus(&self) -> u32 {
        self.stage
            .iter()
            .map(|s| s.target_vus)
            .chain(std::iter::once(self.settings.start_vus))
            .max()
            .unwrap_or(0)
    }

    /// Parse every threshold declaration into typed predicates.
    ///
    /// Thresholds are returned in metric-name order, expressions in
    /// declaration order within a metric.
    pub fn parsed_thresholds(&self) -> Result<Vec<Threshold>, LoadTestError> {
        let mut parsed = Vec::new();
        for (metric, expressions) in &self.thresholds {
            let kind = builtin_metric_kind(metric).ok_or_else(|| {
                LoadTestError::validation(format!(
                    "Threshold references unknown metric '{metric}'"
                ))
            })?;
            for expression in expressions {
                let threshold = Threshold::parse(metric, expression)?;
                if !threshold.aggregate().applies_to(kind) {
                    return Err(LoadTestError::validation(format!(
                        "Threshold '{expression}' is not valid for {kind} metric '{metric}'"
                    )));
                }
                parsed.push(threshold);
            }
        }
        Ok(parsed)
    }

    /// Validate that the config is semantically correct.
    ///
    /// Checks:
    /// - At least one stage, each with `duration_secs > 0`
    /// - A non-empty wordlist with no blank words
    /// - Positive timeout and reconcile interval
    /// - `base_url` is an absolute http(s) URL
    /// - Every threshold parses and names a known metric
    pub fn validate(&self) -> Result<(), LoadTestError> {
        if self.stage.is_empty() {
            return Err(LoadTestError::validation(
                "Config must contain at least one [[stage]] block",
            ));
        }
        for (i, stage) in self.stage.iter().enumerate() {
            if stage.duration_secs == 0 {
                return Err(LoadTestError::validation(format!(
                    "Stage {} has duration_secs=0; each stage must have a positive duration",
                    i + 1
                )));
            }
        }

        if self.payload.words.is_empty() {
            return Err(LoadTestError::validation(
                "payload.words must contain at least one word",
            ));
        }
        if self.payload.words.iter().any(|w| w.trim().is_empty()) {
            return Err(LoadTestError::validation(
                "payload.words must not contain blank entries",
            ));
        }

        if self.settings.timeout_ms == 0 {
            return Err(LoadTestError::validation("settings.timeout_ms must be > 0"));
        }
        if self.settings.reconcile_interval_ms == 0 {
            return Err(LoadTestError::validation(
                "settings.reconcile_interval_ms must be > 0",
            ));
        }
        if self.settings.max_vus == Some(0) {
            return Err(LoadTestError::validation(
                "settings.max_vus must be > 0 when set",
            ));
        }

        validate_base_url(&self.settings.base_url)?;
        self.parsed_thresholds()?;

        Ok(())
    }
}

fn validate_base_url(base_url: &str) -> Result<(), LoadTestError> {
    let parsed = url::Url::parse(base_url).map_err(|e| {
        LoadTestError::validation(format!("settings.base_url '{base_url}' is not a valid URL: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(LoadTestError::validation(format!(
            "settings.base_url must use http or https, got '{other}'"
        ))),
    }
}
