//! Maps a raw Responses API payload into an [`ExecutionResult`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::citations::{Footnotes, UrlAnnotation, clean_inline_citations};
use crate::error::{CommentaryError, ErrorKind};
use crate::response::ExecutionResult;

/// Max characters of the raw payload embedded in a "no content" diagnostic.
const DIAGNOSTIC_PAYLOAD_CHARS: usize = 500;

/// A list whose malformed or untagged entries are dropped instead of failing
/// the whole payload. `null` reads as empty.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ParsedResponse {
    pub id: String,
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub output: Vec<OutputItem>,
    pub error: Option<ApiError>,
    pub incomplete_details: Option<IncompleteDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiError {
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IncompleteDetails {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default, deserialize_with = "lenient_list")]
        content: Vec<ContentPart>,
    },
    /// Reasoning summaries, web search calls and anything newer.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    OutputText {
        #[serde(default)]
        text: String,
        #[serde(default, deserialize_with = "lenient_list")]
        annotations: Vec<Annotation>,
    },
    /// Older shape, used only when no `output_text` part exists.
    Text {
        #[serde(default)]
        text: String,
        #[serde(default, deserialize_with = "lenient_list")]
        annotations: Vec<Annotation>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    UrlCitation {
        #[serde(default)]
        url: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        start_index: Option<usize>,
    },
    #[serde(other)]
    Other,
}

impl ParsedResponse {
    /// First non-empty `output_text` part across message items, falling back
    /// to the first non-empty `text` part.
    pub fn message_content(&self) -> Option<(&str, &[Annotation])> {
        let parts = || {
            self.output.iter().flat_map(|item| match item {
                OutputItem::Message { content } => content.as_slice(),
                OutputItem::Other => Default::default(),
            })
        };

        parts()
            .find_map(|part| match part {
                ContentPart::OutputText { text, annotations } if !text.is_empty() => {
                    Some((text.as_str(), annotations.as_slice()))
                }
                _ => None,
            })
            .or_else(|| {
                parts().find_map(|part| match part {
                    ContentPart::Text { text, annotations } if !text.is_empty() => {
                        Some((text.as_str(), annotations.as_slice()))
                    }
                    _ => None,
                })
            })
    }

    fn failure_status(&self) -> Option<&str> {
        match self.status.as_deref() {
            Some(s @ ("failed" | "cancelled" | "expired")) => Some(s),
            _ => None,
        }
    }
}

fn url_annotations(annotations: &[Annotation]) -> Vec<UrlAnnotation> {
    annotations
        .iter()
        .filter_map(|a| match a {
            Annotation::UrlCitation {
                url,
                title,
                start_index,
            } => Some(UrlAnnotation {
                url: url.clone(),
                title: title.clone().unwrap_or_default(),
                start_index: start_index.unwrap_or_default(),
            }),
            Annotation::Other => None,
        })
        .collect()
}

fn payload_excerpt(payload: &serde_json::Value) -> String {
    let raw = payload.to_string();
    if raw.chars().count() > DIAGNOSTIC_PAYLOAD_CHARS {
        let head: String = raw.chars().take(DIAGNOSTIC_PAYLOAD_CHARS).collect();
        format!("{head}...")
    } else {
        raw
    }
}

/// Never fails: every problem becomes a failure result.
pub fn interpret(payload: &serde_json::Value) -> ExecutionResult {
    let parsed = match ParsedResponse::deserialize(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            return ExecutionResult::from_error(&CommentaryError::SchemaParse(format!(
                "{e}: {}",
                payload_excerpt(payload)
            )));
        }
    };

    let Some((content, annotations)) = parsed.message_content() else {
        if let Some(status) = parsed.failure_status() {
            let message = parsed
                .error
                .as_ref()
                .map(|e| match &e.code {
                    Some(code) => format!("{code}: {}", e.message),
                    None => e.message.clone(),
                })
                .unwrap_or_default();
            return ExecutionResult::from_error(&CommentaryError::JobFailed {
                job_id: parsed.id.clone(),
                status: status.to_string(),
                message,
            });
        }
        let reason = parsed
            .incomplete_details
            .as_ref()
            .and_then(|d| d.reason.as_deref())
            .map(|r| format!(" (incomplete: {r})"))
            .unwrap_or_default();
        return ExecutionResult::failure(
            ErrorKind::Parse,
            format!("No content in response{reason}: {}", payload_excerpt(payload)),
        );
    };

    let footnotes = Footnotes::from_annotations(url_annotations(annotations));
    let cleaned = clean_inline_citations(content.trim(), &footnotes);

    if cleaned.is_empty() {
        return ExecutionResult::from_error(&CommentaryError::EmptyCommentary);
    }

    ExecutionResult::success(cleaned, footnotes.citations)
}
