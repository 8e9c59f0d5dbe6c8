use serde::Serialize;

use crate::error::{CommentaryError, ErrorKind};

/// A source cited by generated text. Unique by url within one result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
}

impl Citation {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Outcome of one request. `success` is false exactly when `error_message`
/// is non-empty; the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    success: bool,
    text: String,
    citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "String::is_empty")]
    error_message: String,
}

impl ExecutionResult {
    pub fn success(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            success: true,
            text: text.into(),
            citations,
            error_kind: None,
            error_message: String::new(),
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut error_message = message.into();
        if error_message.trim().is_empty() {
            error_message = format!("request failed ({})", kind.as_str());
        }
        Self {
            success: false,
            text: String::new(),
            citations: Vec::new(),
            error_kind: Some(kind),
            error_message,
        }
    }

    pub fn from_error(err: &CommentaryError) -> Self {
        Self::failure(err.kind(), err.user_message())
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Caller policy: a structurally successful result without citations
    /// becomes a MissingCitations failure when citations are mandatory.
    pub fn require_citations(self, required: bool) -> Self {
        if required && self.success && self.citations.is_empty() {
            Self::from_error(&CommentaryError::MissingCitations)
        } else {
            self
        }
    }
}
