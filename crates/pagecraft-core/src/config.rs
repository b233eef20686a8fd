use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PagecraftError, Result};

/// Top-level Pagecraft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub review: ReviewConfig,
    /// Runtime logging configuration.
    #[serde(default)]
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Back-edge budget of the quality-gate loop.
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,
    /// Best-effort global deadline, checked between steps (0 = none).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on dispatched nodes per run.
    #[serde(default = "default_max_transitions")]
    pub max_transitions: u32,
    /// Node the reviewer's back-edge re-enters at.
    #[serde(default = "default_retry_entry")]
    pub retry_entry: String,
    /// Tone of voice for generated copy.
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
            timeout_secs: default_timeout_secs(),
            max_transitions: default_max_transitions(),
            retry_entry: default_retry_entry(),
            tone: default_tone(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_max_loops() -> u32 { 3 }
fn default_timeout_secs() -> u64 { 300 }
fn default_max_transitions() -> u32 { 64 }
fn default_retry_entry() -> String { "qgen".to_string() }
fn default_tone() -> String { "Professional".to_string() }
fn default_output_dir() -> String { "output".to_string() }

/// Backoff parameters of one step's retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_max_backoff() -> u64 { 30000 }
fn default_jitter() -> bool { true }

/// Per-step override; unset fields fall back to `[retry.default]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<bool>,
}

impl RetryOverride {
    fn attempts(n: u32) -> Self {
        Self {
            max_attempts: Some(n),
            ..Default::default()
        }
    }

    /// Fields set in `self` win over `base`.
    fn or(self, base: &RetryOverride) -> Self {
        Self {
            max_attempts: self.max_attempts.or(base.max_attempts),
            initial_backoff_ms: self.initial_backoff_ms.or(base.initial_backoff_ms),
            multiplier: self.multiplier.or(base.multiplier),
            max_backoff_ms: self.max_backoff_ms.or(base.max_backoff_ms),
            jitter: self.jitter.or(base.jitter),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub default: RetryConfig,
    /// Per-step overrides, merged field by field over the built-in ones.
    #[serde(
        default = "default_step_overrides",
        deserialize_with = "merge_step_overrides"
    )]
    pub steps: HashMap<String, RetryOverride>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            default: RetryConfig::default(),
            steps: default_step_overrides(),
        }
    }
}

fn default_step_overrides() -> HashMap<String, RetryOverride> {
    let mut steps = HashMap::new();
    steps.insert("parser".to_string(), RetryOverride::attempts(4));
    steps.insert("qgen".to_string(), RetryOverride::attempts(6));
    for page in ["faq_page", "product_page", "comparison_page"] {
        steps.insert(page.to_string(), RetryOverride::attempts(4));
    }
    steps.insert(
        "reviewer".to_string(),
        RetryOverride {
            max_attempts: Some(3),
            initial_backoff_ms: Some(500),
            ..Default::default()
        },
    );
    steps
}

fn merge_step_overrides<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<String, RetryOverride>, D::Error>
where
    D: Deserializer<'de>,
{
    let user = HashMap::<String, RetryOverride>::deserialize(deserializer)?;
    let mut steps = default_step_overrides();
    for (name, entry) in user {
        let merged = match steps.get(&name) {
            Some(builtin) => entry.or(builtin),
            None => entry,
        };
        steps.insert(name, merged);
    }
    Ok(steps)
}

impl RetrySettings {
    /// Effective retry parameters for a step.
    pub fn for_step(&self, name: &str) -> RetryConfig {
        let base = self.default.clone();
        match self.steps.get(name) {
            Some(o) => RetryConfig {
                max_attempts: o.max_attempts.unwrap_or(base.max_attempts),
                initial_backoff_ms: o.initial_backoff_ms.unwrap_or(base.initial_backoff_ms),
                multiplier: o.multiplier.unwrap_or(base.multiplier),
                max_backoff_ms: o.max_backoff_ms.unwrap_or(base.max_backoff_ms),
                jitter: o.jitter.unwrap_or(base.jitter),
            },
            None => base,
        }
    }
}

/// Thresholds applied by the reviewer gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_min_faqs")]
    pub min_faqs: usize,
    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,
    #[serde(default = "default_min_categories")]
    pub min_categories: usize,
    #[serde(default = "default_min_comparison_rows")]
    pub min_comparison_rows: usize,
    #[serde(default = "default_min_headline_chars")]
    pub min_headline_chars: usize,
    #[serde(default = "default_max_headline_chars")]
    pub max_headline_chars: usize,
    #[serde(default = "default_min_description_chars")]
    pub min_description_chars: usize,
    #[serde(default = "default_min_features")]
    pub min_features: usize,
    #[serde(default = "default_min_feature_chars")]
    pub min_feature_chars: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            min_faqs: default_min_faqs(),
            min_answer_chars: default_min_answer_chars(),
            min_categories: default_min_categories(),
            min_comparison_rows: default_min_comparison_rows(),
            min_headline_chars: default_min_headline_chars(),
            max_headline_chars: default_max_headline_chars(),
            min_description_chars: default_min_description_chars(),
            min_features: default_min_features(),
            min_feature_chars: default_min_feature_chars(),
        }
    }
}

fn default_min_faqs() -> usize { 15 }
fn default_min_answer_chars() -> usize { 20 }
fn default_min_categories() -> usize { 3 }
fn default_min_comparison_rows() -> usize { 2 }
fn default_min_headline_chars() -> usize { 10 }
fn default_max_headline_chars() -> usize { 100 }
fn default_min_description_chars() -> usize { 50 }
fn default_min_features() -> usize { 3 }
fn default_min_feature_chars() -> usize { 3 }

/// JSONL runtime logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable runtime logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: <output_dir>/logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Verbosity: 1 = run summary, 2 = per node, 3 = per attempt.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: None,
            level: default_log_level(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PagecraftError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| PagecraftError::Config(e.to_string()))
    }

    /// Resolve the output directory (expand ~).
    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.pipeline.output_dir)
    }

    /// Resolve the JSONL log directory, if runtime logging is enabled.
    pub fn log_dir(&self) -> Option<PathBuf> {
        let log = self.log.as_ref()?;
        if !log.enabled {
            return None;
        }
        Some(match &log.log_dir {
            Some(dir) => expand_home(dir),
            None => self.output_dir().join("logs"),
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
