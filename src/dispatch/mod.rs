pub mod executor;
pub mod responses;
pub mod transport;

use crate::reasoning::{ReasoningEffort, TextVerbosity};

/// One logical generation request. The model and developer prompt live on the
/// executor; everything that can vary per call lives here.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Attach the web search tool.
    pub web_search: bool,
    /// Domains the search should lean on. Named in the prompt; the tool gets a
    /// wider search context when non-empty.
    pub preferred_domains: Vec<String>,
    /// Requested level; normalized against the executor's model before sending.
    pub reasoning_effort: ReasoningEffort,
    pub text_verbosity: TextVerbosity,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            web_search: true,
            preferred_domains: Vec::new(),
            reasoning_effort: ReasoningEffort::Medium,
            text_verbosity: TextVerbosity::default(),
        }
    }
}
