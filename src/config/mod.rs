//! Configuration management.
//!
//! Configuration lives in an optional TOML file (`.claude/tacit.toml` in
//! the project directory by default) with `TACIT_*` environment variable
//! overrides on top. Everything has a sensible default, so a project with
//! no config file at all still works.

use crate::models::BodyShape;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default similarity required to merge two key points.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.80;
/// Default score at or below which key points are pruned.
pub const DEFAULT_PRUNE_THRESHOLD: i64 = -5;
/// Default playbook capacity.
pub const DEFAULT_MAX_KPTS: usize = 250;
/// Default number of key points injected per prompt.
pub const DEFAULT_SELECTION_LIMIT: usize = 6;
/// Default selection temperature when the LLM does not supply one.
pub const DEFAULT_TEMPERATURE: f64 = 0.5;
/// Default number of backups retained.
pub const DEFAULT_BACKUP_KEEP: usize = 3;

/// Main configuration for tacit.
#[derive(Debug, Clone)]
pub struct TacitConfig {
    /// Project directory the playbook belongs to.
    pub project_dir: PathBuf,
    /// Path to the playbook file.
    pub playbook_path: PathBuf,
    /// Directory holding prompt template overrides.
    pub template_dir: PathBuf,
    /// Directory for diagnostic output.
    pub diagnostic_dir: PathBuf,
    /// Whether verbose diagnostics are written.
    pub diagnostic_mode: bool,
    /// LLM endpoint settings.
    pub llm: LlmSettings,
    /// Minimum LLM-reported similarity to merge key points.
    pub merge_threshold: f64,
    /// Score at or below which key points are pruned.
    pub prune_threshold: i64,
    /// Maximum playbook size.
    pub max_kpts: usize,
    /// Number of key points injected per prompt.
    pub selection_limit: usize,
    /// Temperature used when inference supplies none.
    pub default_temperature: f64,
    /// Number of timestamped backups to keep.
    pub backup_keep: usize,
    /// Whether the prompt keyword heuristic may override the LLM
    /// temperature.
    pub adaptive_temperature: bool,
    /// Canonical body shape written to disk.
    pub canonical_shape: BodyShape,
    /// Run reflection when a session ends normally.
    pub update_on_exit: bool,
    /// Run reflection when the user clears the conversation.
    pub update_on_clear: bool,
    /// Deadline for the prompt-submit hook.
    pub prompt_deadline: Duration,
    /// Deadline for the session-end and pre-compact hooks.
    pub reflect_deadline: Duration,
    /// Logging format override from the config file.
    pub log_format: Option<String>,
    /// Logging level override from the config file.
    pub log_level: Option<String>,
}

/// LLM endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// API key; falls back to `ANTHROPIC_API_KEY`.
    pub api_key: Option<String>,
    /// Base URL of the Messages API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries on transport errors (schema errors are never retried).
    pub retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-3-5-haiku-20241022".to_string(),
            timeout: Duration::from_secs(30),
            retries: 2,
        }
    }
}

impl Default for TacitConfig {
    fn default() -> Self {
        Self::for_project(default_project_dir())
    }
}

impl TacitConfig {
    /// Builds the default configuration rooted at a project directory.
    #[must_use]
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let claude_dir = project_dir.join(".claude");
        Self {
            playbook_path: claude_dir.join("playbook.json"),
            template_dir: claude_dir.join("templates"),
            diagnostic_dir: claude_dir.join("diagnostic"),
            diagnostic_mode: false,
            project_dir,
            llm: LlmSettings::default(),
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            max_kpts: DEFAULT_MAX_KPTS,
            selection_limit: DEFAULT_SELECTION_LIMIT,
            default_temperature: DEFAULT_TEMPERATURE,
            backup_keep: DEFAULT_BACKUP_KEEP,
            adaptive_temperature: true,
            canonical_shape: BodyShape::Legacy,
            update_on_exit: false,
            update_on_clear: false,
            prompt_deadline: Duration::from_secs(10),
            reflect_deadline: Duration::from_secs(120),
            log_format: None,
            log_level: None,
        }
    }

    /// Loads configuration: project defaults, then the config file if one
    /// exists, then environment overrides.
    #[must_use]
    pub fn load_default() -> Self {
        let project_dir = default_project_dir();
        let config_path = project_dir.join(".claude").join("tacit.toml");
        let mut config = if config_path.is_file() {
            Self::load_from_file(&config_path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %config_path.display(), "ignoring bad config file");
                Self::for_project(&project_dir)
            })
        } else {
            Self::for_project(&project_dir)
        };
        config.apply_env_overrides();
        config
    }

    /// Loads configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] when the file is unreadable
    /// or not valid TOML.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| crate::Error::io("read_config", &e))?;
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|e| crate::Error::InvalidInput(format!("config parse: {e}")))?;

        let project_dir = file
            .project_dir
            .clone()
            .unwrap_or_else(default_project_dir);
        let mut config = Self::for_project(project_dir);
        file.apply_to(&mut config);
        Ok(config)
    }

    /// Applies `TACIT_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TACIT_PLAYBOOK_PATH") {
            if !path.trim().is_empty() {
                self.playbook_path = PathBuf::from(path);
            }
        }
        if let Some(key) = non_empty_env("TACIT_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = non_empty_env("TACIT_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = non_empty_env("TACIT_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(ms) = parsed_env::<u64>("TACIT_LLM_TIMEOUT_MS") {
            self.llm.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parsed_env::<u32>("TACIT_LLM_RETRIES") {
            self.llm.retries = retries;
        }
        if let Some(threshold) = parsed_env::<f64>("TACIT_MERGE_THRESHOLD") {
            self.merge_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(threshold) = parsed_env::<i64>("TACIT_PRUNE_THRESHOLD") {
            self.prune_threshold = threshold;
        }
        if let Some(max) = parsed_env::<usize>("TACIT_MAX_KPTS") {
            self.max_kpts = max.max(1);
        }
        if let Some(limit) = parsed_env::<usize>("TACIT_SELECTION_LIMIT") {
            self.selection_limit = limit.max(1);
        }
        if let Some(temperature) = parsed_env::<f64>("TACIT_DEFAULT_TEMPERATURE") {
            self.default_temperature = temperature.clamp(0.0, 1.0);
        }
        if let Some(keep) = parsed_env::<usize>("TACIT_BACKUP_KEEP") {
            self.backup_keep = keep;
        }
        if let Some(flag) = bool_env("TACIT_ADAPTIVE_TEMPERATURE") {
            self.adaptive_temperature = flag;
        }
        if let Some(flag) = bool_env("TACIT_UPDATE_ON_EXIT") {
            self.update_on_exit = flag;
        }
        if let Some(flag) = bool_env("TACIT_UPDATE_ON_CLEAR") {
            self.update_on_clear = flag;
        }
        if let Some(flag) = bool_env("TACIT_DIAGNOSTIC") {
            self.diagnostic_mode = flag;
        }
    }

    /// Resolves the effective API key, falling back to `ANTHROPIC_API_KEY`.
    #[must_use]
    pub fn effective_api_key(&self) -> Option<String> {
        self.llm
            .api_key
            .clone()
            .or_else(|| non_empty_env("ANTHROPIC_API_KEY"))
    }
}

/// On-disk TOML schema. Everything is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    project_dir: Option<PathBuf>,
    playbook_path: Option<PathBuf>,
    template_dir: Option<PathBuf>,
    diagnostic_mode: Option<bool>,
    merge_threshold: Option<f64>,
    prune_threshold: Option<i64>,
    max_kpts: Option<usize>,
    selection_limit: Option<usize>,
    default_temperature: Option<f64>,
    backup_keep: Option<usize>,
    adaptive_temperature: Option<bool>,
    canonical_shape: Option<BodyShape>,
    update_on_exit: Option<bool>,
    update_on_clear: Option<bool>,
    prompt_deadline_secs: Option<u64>,
    reflect_deadline_secs: Option<u64>,
    #[serde(default)]
    llm: LlmFile,
    #[serde(default)]
    logging: LoggingFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LlmFile {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingFile {
    format: Option<String>,
    level: Option<String>,
}

impl ConfigFile {
    #[allow(clippy::similar_names)]
    fn apply_to(self, config: &mut TacitConfig) {
        if let Some(path) = self.playbook_path {
            config.playbook_path = path;
        }
        if let Some(dir) = self.template_dir {
            config.template_dir = dir;
        }
        if let Some(flag) = self.diagnostic_mode {
            config.diagnostic_mode = flag;
        }
        if let Some(threshold) = self.merge_threshold {
            config.merge_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(threshold) = self.prune_threshold {
            config.prune_threshold = threshold;
        }
        if let Some(max) = self.max_kpts {
            config.max_kpts = max.max(1);
        }
        if let Some(limit) = self.selection_limit {
            config.selection_limit = limit.max(1);
        }
        if let Some(temperature) = self.default_temperature {
            config.default_temperature = temperature.clamp(0.0, 1.0);
        }
        if let Some(keep) = self.backup_keep {
            config.backup_keep = keep;
        }
        if let Some(flag) = self.adaptive_temperature {
            config.adaptive_temperature = flag;
        }
        if let Some(shape) = self.canonical_shape {
            config.canonical_shape = shape;
        }
        if let Some(flag) = self.update_on_exit {
            config.update_on_exit = flag;
        }
        if let Some(flag) = self.update_on_clear {
            config.update_on_clear = flag;
        }
        if let Some(secs) = self.prompt_deadline_secs {
            config.prompt_deadline = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = self.reflect_deadline_secs {
            config.reflect_deadline = Duration::from_secs(secs.max(1));
        }
        if let Some(key) = self.llm.api_key {
            config.llm.api_key = Some(key);
        }
        if let Some(url) = self.llm.base_url {
            config.llm.base_url = url;
        }
        if let Some(model) = self.llm.model {
            config.llm.model = model;
        }
        if let Some(ms) = self.llm.timeout_ms {
            config.llm.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = self.llm.retries {
            config.llm.retries = retries;
        }
        config.log_format = self.logging.format;
        config.log_level = self.logging.level;
    }
}

/// The project directory: `CLAUDE_PROJECT_DIR` or the working directory.
fn default_project_dir() -> PathBuf {
    std::env::var("CLAUDE_PROJECT_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map_or_else(
            || std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            PathBuf::from,
        )
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn bool_env(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TacitConfig::for_project("/tmp/project");
        assert_eq!(
            config.playbook_path,
            PathBuf::from("/tmp/project/.claude/playbook.json")
        );
        assert!((config.merge_threshold - 0.80).abs() < f64::EPSILON);
        assert_eq!(config.prune_threshold, -5);
        assert_eq!(config.max_kpts, 250);
        assert_eq!(config.selection_limit, 6);
        assert_eq!(config.backup_keep, 3);
        assert!(!config.update_on_exit);
        assert!(config.adaptive_temperature);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tacit.toml");
        std::fs::write(
            &path,
            r#"
max_kpts = 100
selection_limit = 4
merge_threshold = 0.9
update_on_exit = true
canonical_shape = "when_do"

[llm]
model = "claude-3-5-sonnet-20241022"
timeout_ms = 5000
retries = 1

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = TacitConfig::load_from_file(&path).unwrap();
        assert_eq!(config.max_kpts, 100);
        assert_eq!(config.selection_limit, 4);
        assert!((config.merge_threshold - 0.9).abs() < f64::EPSILON);
        assert!(config.update_on_exit);
        assert_eq!(config.canonical_shape, BodyShape::WhenDo);
        assert_eq!(config.llm.model, "claude-3-5-sonnet-20241022");
        assert_eq!(config.llm.timeout, Duration::from_millis(5000));
        assert_eq!(config.llm.retries, 1);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tacit.toml");
        std::fs::write(&path, "max_kpts = \"not a number\"").unwrap();
        assert!(TacitConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tacit.toml");
        std::fs::write(&path, "max_ktps = 10").unwrap();
        assert!(TacitConfig::load_from_file(&path).is_err());
    }
}
