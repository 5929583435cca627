//! Run configuration.
//!
//! Layers, lowest priority first: built-in defaults, a TOML file, environment
//! variables, and finally whatever the caller sets with the `with_*` methods
//! (the CLI flags). The API key may also come from `api_key_file`.

use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "prestige.toml";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API key configured - set ANTHROPIC_API_KEY or api_key_file")]
    MissingApiKey,

    #[error("No output path configured for the site")]
    MissingOutputPath,

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Everything a run needs to know besides the date.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Anthropic credential.
    pub api_key: Option<String>,

    /// File holding the credential, read when `api_key` is unset.
    pub api_key_file: Option<PathBuf>,

    /// Model override; the client default is used when unset.
    pub model: Option<String>,

    /// Maximum tokens per model response.
    pub max_tokens: usize,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Per-request timeout for model calls.
    pub request_timeout_secs: u64,

    /// Extra attempts after the first failed model call.
    pub max_retries: u32,

    /// Backoff shape shared by model and publish retries.
    pub retry: BackoffConfig,

    pub site: SiteConfig,
    pub story: StoryConfig,
    pub publish: PublishConfig,

    /// USD per token for the cost estimate in the run report.
    pub cost_per_token: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_file: None,
            model: None,
            max_tokens: 1024,
            temperature: Some(0.9),
            request_timeout_secs: 120,
            max_retries: 3,
            retry: BackoffConfig::default(),
            site: SiteConfig::default(),
            story: StoryConfig::default(),
            publish: PublishConfig::default(),
            cost_per_token: 0.00015,
        }
    }
}

// Hand-written so the credential never reaches a log line.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_file", &self.api_key_file)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry", &self.retry)
            .field("site", &self.site)
            .field("story", &self.story)
            .field("publish", &self.publish)
            .field("cost_per_token", &self.cost_per_token)
            .finish()
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Where and how the site is written.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Root of the static site (holds `index.html` and `stories/`).
    pub output_path: PathBuf,

    /// Custom story page template; the built-in one is used when unset.
    pub story_template: Option<PathBuf>,

    /// Publication name shown in page titles and prompts.
    pub name: String,

    /// Tagline under the masthead.
    pub tagline: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("docs"),
            story_template: None,
            name: "Prestige Report".to_string(),
            tagline: "Exclusive Stories From The World's Elite".to_string(),
        }
    }
}

/// Shape of the generated story.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoryConfig {
    pub byline: String,

    /// Ideas the editor pitches before the writer chooses.
    pub idea_count: u32,

    /// Target length of the story.
    pub word_count: u32,

    /// Editor revisions after the first draft.
    pub edit_passes: u32,

    /// Optional steer for the editor's pitches.
    pub theme_hints: Vec<String>,

    /// How many recent headlines to show the editor as off-limits.
    pub avoid_recent: usize,

    /// Replaces the built-in editor persona.
    pub editor_persona: Option<String>,

    /// Replaces the built-in writer persona.
    pub writer_persona: Option<String>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            byline: "Prestige Report Staff".to_string(),
            idea_count: 3,
            word_count: 300,
            edit_passes: 1,
            theme_hints: Vec::new(),
            avoid_recent: 10,
            editor_persona: None,
            writer_persona: None,
        }
    }
}

/// Publication step settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Extra attempts for failed writes or commits.
    pub retries: u32,
    pub git: GitConfig,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            git: GitConfig::default(),
        }
    }
}

/// Commit-and-push settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub enabled: bool,
    pub push: bool,
    pub remote: String,

    /// Branch to push; the current upstream is used when unset.
    pub branch: Option<String>,

    /// Repository to commit in; defaults to the site's parent directory.
    pub repo_dir: Option<PathBuf>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            push: true,
            remote: "origin".to_string(),
            branch: None,
            repo_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from a file (if any) and the environment.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// used when present in the working directory.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.resolve_api_key_file()?;
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay environment variables using the given lookup.
    ///
    /// `ANTHROPIC_API_KEY` wins over the older `ANTHROPIC_KEY` name.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("ANTHROPIC_API_KEY").or_else(|| non_empty("ANTHROPIC_KEY")) {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(model) = non_empty("PRESTIGE_MODEL") {
            self.model = Some(model);
        }
        if let Some(dir) = non_empty("PRESTIGE_SITE_DIR") {
            self.site.output_path = PathBuf::from(dir);
        }
        if let Some(retries) = non_empty("PRESTIGE_MAX_RETRIES") {
            self.max_retries = retries.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "PRESTIGE_MAX_RETRIES",
                reason: format!("expected a whole number, got {retries:?}"),
            })?;
        }
        Ok(())
    }

    /// Fill `api_key` from `api_key_file` when no key was given directly.
    pub fn resolve_api_key_file(&mut self) -> Result<(), ConfigError> {
        if self.api_key.is_some() {
            return Ok(());
        }
        let Some(path) = &self.api_key_file else {
            return Ok(());
        };

        let key = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let key = key.trim();
        if !key.is_empty() {
            self.api_key = Some(key.to_string());
        }
        Ok(())
    }

    /// Check that everything a run depends on is present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_key()?;

        if self.site.output_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingOutputPath);
        }
        if self.max_tokens == 0 {
            return Err(invalid("max_tokens", "must be greater than zero"));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err(invalid("temperature", "must be between 0.0 and 1.0"));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be greater than zero"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be at least 1.0"));
        }
        if self.story.edit_passes == 0 {
            return Err(invalid("story.edit_passes", "at least one edit pass is required"));
        }
        if self.publish.git.enabled && self.publish.git.remote.trim().is_empty() {
            return Err(invalid("publish.git.remote", "must not be empty"));
        }
        Ok(())
    }

    /// The credential, or [`ConfigError::MissingApiKey`].
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// Retry policy for model calls.
    pub fn model_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_backoff(self.max_retries, &self.retry)
    }

    /// Retry policy for site writes and commits.
    pub fn publish_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_backoff(self.publish.retries, &self.retry)
    }

    /// Repository the git hook runs in.
    pub fn repo_dir(&self) -> PathBuf {
        if let Some(dir) = &self.publish.git.repo_dir {
            return dir.clone();
        }
        match self.site.output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.site.output_path = path.into();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_edit_passes(mut self, passes: u32) -> Self {
        self.story.edit_passes = passes;
        self
    }

    pub fn with_theme_hints(mut self, hints: Vec<String>) -> Self {
        self.story.theme_hints = hints;
        self
    }

    /// Turn git commits on or off.
    pub fn with_git(mut self, enabled: bool) -> Self {
        self.publish.git.enabled = enabled;
        self
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.publish.git.push = push;
        self
    }

    /// Zero every backoff delay. Handy for tests.
    pub fn without_backoff(mut self) -> Self {
        self.retry.initial_delay_ms = 0;
        self.retry.max_delay_ms = 0;
        self
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
