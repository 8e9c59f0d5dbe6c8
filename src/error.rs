use serde::Serialize;
use thiserror::Error;

/// Max characters of an upstream body kept in an error message.
const BODY_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum CommentaryError {
    #[error("cancelled")]
    Cancelled,

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("upstream HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("empty commentary in response")]
    EmptyCommentary,

    #[error("no citations found in response (citations are required)")]
    MissingCitations,

    #[error("job {job_id} ended with status {status}: {message}")]
    JobFailed {
        job_id: String,
        status: String,
        message: String,
    },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure category recorded on a per-item result.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    RateLimited,
    Http,
    Network,
    Parse,
    MissingCitations,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Http => "http",
            Self::Network => "network",
            Self::Parse => "parse",
            Self::MissingCitations => "missing_citations",
            Self::Internal => "internal",
        }
    }
}

impl CommentaryError {
    /// Build an Upstream error, truncating the body so logs stay readable.
    pub fn upstream(status: u16, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let mut message: String = text.chars().take(BODY_EXCERPT_CHARS).collect();
        if text.chars().count() > BODY_EXCERPT_CHARS {
            message.push_str("...");
        }
        Self::Upstream { status, message }
    }

    /// Returns true for transient errors that may succeed on a later attempt.
    /// Timeouts are excluded: the job may still be running server-side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Upstream { .. } | Self::Network(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Category stored on the item result. Cancellation never reaches an item
    /// result (the whole batch is cancelled instead), so it maps to Internal.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Upstream { .. } => ErrorKind::Http,
            Self::Network(_) => ErrorKind::Network,
            Self::SchemaParse(_) | Self::EmptyCommentary | Self::JobFailed { .. } => {
                ErrorKind::Parse
            }
            Self::MissingCitations => ErrorKind::MissingCitations,
            Self::Cancelled | Self::Credential(_) | Self::Config(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Message written into the commentary cell and the run log.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout(ms) => format!(
                "request timed out after {:.1}s (the job may still be processing server-side)",
                *ms as f64 / 1000.0
            ),
            Self::RateLimited { attempts } => {
                format!("rate limited by the API after {attempts} attempts")
            }
            Self::Upstream { status, message } => {
                format!("API request failed with HTTP {status}: {message}")
            }
            Self::Network(msg) => format!("API request failed: {msg}"),
            Self::SchemaParse(msg) => format!("failed to parse response: {msg}"),
            Self::EmptyCommentary => "Empty commentary in response".to_string(),
            Self::MissingCitations => {
                "No citations found in response (citations are required)".to_string()
            }
            other => other.to_string(),
        }
    }
}
