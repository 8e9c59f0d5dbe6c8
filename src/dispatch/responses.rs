use std::time::Duration;

use serde_json::json;

use crate::dispatch::GenerationRequest;
use crate::dispatch::transport::{Method, WireRequest};
use crate::error::CommentaryError;
use crate::reasoning::{self, ReasoningEffort};

/// Timeout for a single status poll; the overall wait is bounded separately.
pub const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What a submit or poll payload says about the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued or running; poll again with this id.
    Pending { id: String },
    /// Completed, failed, cancelled, expired or incomplete. No further polling helps.
    Terminal,
}

/// Request building and status detection for the Responses API.
#[derive(Debug, Clone)]
pub struct ResponsesApi {
    base_url: String,
    api_key: String,
    model: String,
    developer_prompt: String,
}

impl ResponsesApi {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        developer_prompt: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            developer_prompt: developer_prompt.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Reasoning level actually sent for this model.
    pub fn effective_effort(&self, requested: ReasoningEffort) -> ReasoningEffort {
        reasoning::normalize(&self.model, requested)
    }

    fn auth_headers(&self) -> Vec<(String, String)> {
        vec![("Authorization".to_string(), format!("Bearer {}", self.api_key))]
    }

    pub fn build_payload(&self, req: &GenerationRequest) -> serde_json::Value {
        let effort = self.effective_effort(req.reasoning_effort);
        let mut body = json!({
            "model": self.model,
            "input": [
                {"role": "developer", "content": self.developer_prompt},
                {"role": "user", "content": req.prompt},
            ],
            "reasoning": {"effort": effort.as_str()},
            "text": {"verbosity": req.text_verbosity.as_str()},
        });

        if req.web_search {
            let mut tool = json!({"type": "web_search"});
            if !req.preferred_domains.is_empty() {
                tool["search_context_size"] = json!("medium");
            }
            body["tools"] = json!([tool]);
        }

        body
    }

    pub fn build_submit_request(&self, req: &GenerationRequest, timeout: Duration) -> WireRequest {
        let mut headers = self.auth_headers();
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        WireRequest {
            method: Method::Post,
            url: format!("{}/responses", self.base_url),
            headers,
            body: Some(self.build_payload(req)),
            timeout,
        }
    }

    pub fn build_poll_request(&self, job_id: &str) -> WireRequest {
        WireRequest {
            method: Method::Get,
            url: format!("{}/responses/{job_id}", self.base_url),
            headers: self.auth_headers(),
            body: None,
            timeout: POLL_REQUEST_TIMEOUT,
        }
    }

    pub fn parse_body(&self, body: &[u8]) -> Result<serde_json::Value, CommentaryError> {
        serde_json::from_slice(body)
            .map_err(|e| CommentaryError::SchemaParse(format!("response is not JSON: {e}")))
    }

    pub fn job_status(payload: &serde_json::Value) -> JobStatus {
        let id = payload["id"].as_str().unwrap_or("");
        match payload["status"].as_str() {
            Some("queued" | "in_progress" | "running") if !id.is_empty() => JobStatus::Pending {
                id: id.to_string(),
            },
            _ => JobStatus::Terminal,
        }
    }
}
