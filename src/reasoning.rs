use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CommentaryError;

/// Models offered for selection, in display order.
pub const AVAILABLE_MODELS: &[&str] = &[
    "gpt-5-nano-2025-08-07",
    "gpt-5.2-pro-2025-12-11",
    "gpt-5.2-2025-12-11",
];

pub const DEFAULT_MODEL: &str = "gpt-5.2-2025-12-11";

/// Reasoning effort level for thinking models.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
    Xhigh,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Xhigh => "xhigh",
        }
    }

    /// Per-request timeout. Deeper reasoning runs proportionally longer server-side;
    /// levels without an explicit entry use the medium timeout.
    pub fn request_timeout(&self) -> Duration {
        match self {
            Self::Low => Duration::from_secs(120),
            Self::Medium => Duration::from_secs(300),
            Self::High => Duration::from_secs(600),
            Self::None | Self::Xhigh => Duration::from_secs(300),
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = CommentaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "xhigh" => Ok(Self::Xhigh),
            other => Err(CommentaryError::Config(format!(
                "unknown reasoning level: {other}"
            ))),
        }
    }
}

/// Output length hint sent as `text.verbosity`.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextVerbosity {
    Low,
    #[default]
    Medium,
    High,
}

impl TextVerbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Model families that share one set of supported reasoning levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// gpt-5.2 and dated snapshots.
    Standard,
    /// gpt-5.2-pro: no cheap levels.
    Pro,
    /// Everything else (nano/mini and older gpt-5).
    Compact,
}

/// Prefix table, most specific first.
const FAMILY_PREFIXES: &[(&str, ModelFamily)] = &[
    ("gpt-5.2-pro", ModelFamily::Pro),
    ("gpt-5.2", ModelFamily::Standard),
];

impl ModelFamily {
    pub fn for_model(model_id: &str) -> Self {
        FAMILY_PREFIXES
            .iter()
            .find(|(prefix, _)| model_id.starts_with(prefix))
            .map(|(_, family)| *family)
            .unwrap_or(Self::Compact)
    }

    pub fn supported_levels(&self) -> &'static [ReasoningEffort] {
        use ReasoningEffort::*;
        match self {
            Self::Standard => &[None, Low, Medium, High, Xhigh],
            Self::Pro => &[Medium, High, Xhigh],
            Self::Compact => &[Low, Medium, High],
        }
    }

    /// Fallback for unsupported requests: "none" where the family has it, else medium.
    pub fn default_level(&self) -> ReasoningEffort {
        if self.supports(ReasoningEffort::None) {
            ReasoningEffort::None
        } else {
            ReasoningEffort::Medium
        }
    }

    pub fn supports(&self, level: ReasoningEffort) -> bool {
        self.supported_levels().contains(&level)
    }
}

/// Supported reasoning levels for a model id. Used for both the request payload
/// and the options offered in a settings form.
pub fn levels_for_model(model_id: &str) -> &'static [ReasoningEffort] {
    ModelFamily::for_model(model_id).supported_levels()
}

/// Clamp a requested level to one the model accepts.
pub fn normalize(model_id: &str, requested: ReasoningEffort) -> ReasoningEffort {
    let family = ModelFamily::for_model(model_id);
    if family.supports(requested) {
        requested
    } else {
        family.default_level()
    }
}

/// Like [`normalize`], but for raw strings from config files or forms.
/// Unrecognized values fall back to the family default.
pub fn normalize_str(model_id: &str, requested: &str) -> ReasoningEffort {
    match requested.parse::<ReasoningEffort>() {
        Ok(level) => normalize(model_id, level),
        Err(_) => ModelFamily::for_model(model_id).default_level(),
    }
}

/// Startup check that the capability table covers every offered model.
pub fn validate_models(models: &[&str], default_model: &str) -> Result<(), CommentaryError> {
    if models.is_empty() {
        return Err(CommentaryError::Config("no models offered".to_string()));
    }
    if !models.contains(&default_model) {
        return Err(CommentaryError::Config(format!(
            "default model {default_model} is not in the offered model list"
        )));
    }
    for model in models {
        let family = ModelFamily::for_model(model);
        if !family.supports(family.default_level()) {
            return Err(CommentaryError::Config(format!(
                "model {model}: default reasoning level is not supported"
            )));
        }
        if !FAMILY_PREFIXES.iter().any(|(p, _)| model.starts_with(p)) {
            tracing::debug!(model = %model, "model uses the compact reasoning table");
        }
    }
    Ok(())
}
