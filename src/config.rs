use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CommentaryError;
use crate::prompt::{
    DEFAULT_ATTRIBUTION_DEVELOPER_PROMPT, DEFAULT_ATTRIBUTION_TEMPLATE, DEFAULT_DEVELOPER_PROMPT,
    DEFAULT_SECURITY_TEMPLATE,
};
use crate::reasoning::{self, AVAILABLE_MODELS, DEFAULT_MODEL, ReasoningEffort, TextVerbosity};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Concurrency, retry and polling knobs for the request layer.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_concurrent: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_factor: f64,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    pub poll_interval: Duration,
    /// Consecutive transient poll failures tolerated before giving up.
    pub max_poll_failures: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 20,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            jitter_factor: 0.2,
            max_attempts: 5,
            poll_interval: Duration::from_secs(2),
            max_poll_failures: 5,
        }
    }
}

/// Process-level configuration (endpoint and rate limits).
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("OPENAI_BASE_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.base_url = url.to_string();
            }
        }

        if let Ok(raw) = env::var("CONTRIBNOTE_MAX_CONCURRENT") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.rate_limit.max_concurrent = n,
                _ => tracing::warn!(
                    value = %raw,
                    "ignoring invalid CONTRIBNOTE_MAX_CONCURRENT"
                ),
            }
        }

        config
    }
}

/// User settings persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub prompt_template: String,
    pub developer_prompt: String,
    pub thinking_level: ReasoningEffort,
    pub model: String,
    pub text_verbosity: TextVerbosity,
    pub preferred_sources: Vec<String>,
    pub require_citations: bool,
    pub prioritize_sources: bool,
    pub run_attribution_overview: bool,
    pub attribution_prompt_template: String,
    pub attribution_developer_prompt: String,
    pub attribution_thinking_level: ReasoningEffort,
    pub attribution_model: String,
    pub attribution_text_verbosity: TextVerbosity,
    pub output_folder: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prompt_template: DEFAULT_SECURITY_TEMPLATE.to_string(),
            developer_prompt: DEFAULT_DEVELOPER_PROMPT.to_string(),
            thinking_level: ReasoningEffort::Medium,
            model: DEFAULT_MODEL.to_string(),
            text_verbosity: TextVerbosity::default(),
            preferred_sources: Vec::new(),
            require_citations: true,
            prioritize_sources: true,
            run_attribution_overview: false,
            attribution_prompt_template: DEFAULT_ATTRIBUTION_TEMPLATE.to_string(),
            attribution_developer_prompt: DEFAULT_ATTRIBUTION_DEVELOPER_PROMPT.to_string(),
            attribution_thinking_level: ReasoningEffort::Medium,
            attribution_model: DEFAULT_MODEL.to_string(),
            attribution_text_verbosity: TextVerbosity::default(),
            output_folder: String::new(),
        }
    }
}

/// Raw on-disk shape. Levels stay strings here so that an unknown value is
/// normalized instead of failing the whole file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    prompt_template: Option<String>,
    developer_prompt: Option<String>,
    thinking_level: Option<String>,
    model: Option<String>,
    text_verbosity: Option<TextVerbosity>,
    preferred_sources: Option<Vec<String>>,
    require_citations: Option<bool>,
    prioritize_sources: Option<bool>,
    run_attribution_overview: Option<bool>,
    attribution_prompt_template: Option<String>,
    attribution_developer_prompt: Option<String>,
    attribution_thinking_level: Option<String>,
    attribution_model: Option<String>,
    attribution_text_verbosity: Option<TextVerbosity>,
    output_folder: Option<String>,
}

fn offered_model_or_default(model: Option<String>) -> String {
    match model {
        Some(m) if AVAILABLE_MODELS.contains(&m.as_str()) => m,
        _ => DEFAULT_MODEL.to_string(),
    }
}

impl Settings {
    /// Platform config directory: `%APPDATA%\ContribNote` on Windows,
    /// `~/.contribnote` elsewhere.
    pub fn default_dir() -> PathBuf {
        if cfg!(windows) {
            let base = env::var("APPDATA")
                .ok()
                .or_else(|| env::var("USERPROFILE").ok())
                .unwrap_or_else(|| ".".to_string());
            PathBuf::from(base).join("ContribNote")
        } else {
            let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".contribnote")
        }
    }

    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.json")
    }

    /// Parse settings JSON, normalizing models and reasoning levels.
    pub fn from_json(json: &str) -> Result<Self, CommentaryError> {
        let raw: RawSettings = serde_json::from_str(json)
            .map_err(|e| CommentaryError::Config(format!("invalid settings file: {e}")))?;
        let defaults = Settings::default();

        let model = offered_model_or_default(raw.model);
        let attribution_model = offered_model_or_default(raw.attribution_model);
        let thinking_level = raw
            .thinking_level
            .map(|l| reasoning::normalize_str(&model, &l))
            .unwrap_or_else(|| reasoning::normalize(&model, defaults.thinking_level));
        let attribution_thinking_level = raw
            .attribution_thinking_level
            .map(|l| reasoning::normalize_str(&attribution_model, &l))
            .unwrap_or_else(|| {
                reasoning::normalize(&attribution_model, defaults.attribution_thinking_level)
            });

        Ok(Self {
            prompt_template: raw.prompt_template.unwrap_or(defaults.prompt_template),
            developer_prompt: raw.developer_prompt.unwrap_or(defaults.developer_prompt),
            thinking_level,
            model,
            text_verbosity: raw.text_verbosity.unwrap_or(defaults.text_verbosity),
            preferred_sources: raw
                .preferred_sources
                .unwrap_or_default()
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            require_citations: raw.require_citations.unwrap_or(defaults.require_citations),
            prioritize_sources: raw.prioritize_sources.unwrap_or(defaults.prioritize_sources),
            run_attribution_overview: raw
                .run_attribution_overview
                .unwrap_or(defaults.run_attribution_overview),
            attribution_prompt_template: raw
                .attribution_prompt_template
                .unwrap_or(defaults.attribution_prompt_template),
            attribution_developer_prompt: raw
                .attribution_developer_prompt
                .unwrap_or(defaults.attribution_developer_prompt),
            attribution_thinking_level,
            attribution_model,
            attribution_text_verbosity: raw
                .attribution_text_verbosity
                .unwrap_or(defaults.attribution_text_verbosity),
            output_folder: raw.output_folder.unwrap_or_default(),
        })
    }

    /// Load settings; a missing file means defaults, a broken one logs and
    /// falls back to defaults.
    pub fn load(path: &Path) -> Self {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "could not read settings: {e}");
                return Self::default();
            }
        };
        match Self::from_json(&json) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), "could not load settings: {e}");
                Self::default()
            }
        }
    }

    /// Write settings atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), CommentaryError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CommentaryError::Config(format!("serialize settings: {e}")))?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json.as_bytes())?;
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}
