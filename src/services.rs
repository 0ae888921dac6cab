//! Collaborator seams: the three external services the pipeline depends on.
//!
//! The pipeline only ever talks to these traits, so the HTTP clients in
//! `gemini` and `serpapi` can be swapped for scripted fakes in tests.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

use crate::models::Price;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("empty response")]
    Empty,
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Http(format!("request timed out: {e}"))
        } else {
            ServiceError::Http(e.to_string())
        }
    }
}

/// Bounds one external call. An elapsed call is an ordinary `ServiceError`.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ServiceError::Timeout(limit))?
}

#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Runs one completion with a role instruction plus the user's text.
    async fn complete(&self, instruction: &str, user_text: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub query: String,
    pub country: String,
    pub language: String,
    pub count: usize,
}

/// One shopping result as the provider returns it. Every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawListing {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub extracted_price: Option<Price>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub product_link: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[async_trait]
pub trait ShoppingSearch: Send + Sync {
    async fn search(&self, params: &SearchParams) -> Result<Vec<RawListing>, ServiceError>;
}

/// An image ready to be embedded inline in a synthesis request.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub bytes: Bytes,
}

#[async_trait]
pub trait ImageSynthesis: Send + Sync {
    async fn synthesize(
        &self,
        prompt: &str,
        subject: &InlineImage,
        garment: &InlineImage,
    ) -> Result<GenerateContentResponse, ServiceError>;
}

// --- Response shape shared by completion and synthesis ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptFeedback {
    #[serde(rename = "blockReason", default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
    #[serde(rename = "finishReason", default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Inline {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
    Other(serde::de::IgnoredAny),
}

#[derive(Debug, Clone, Deserialize)]
pub struct InlineData {
    pub data: String,
    #[serde(rename = "mimeType", alias = "mime_type", default)]
    pub mime_type: Option<String>,
}

impl GenerateContentResponse {
    pub fn first_inline_image(&self) -> Option<&InlineData> {
        self.candidates
            .iter()
            .flat_map(|c| c.content.parts.iter())
            .find_map(|p| match p {
                Part::Inline { inline_data } if !inline_data.data.is_empty() => Some(inline_data),
                _ => None,
            })
    }

    /// All text segments of the first candidate, joined.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    /// Why the service produced nothing, when it says so.
    pub fn refusal_reason(&self) -> Option<String> {
        if let Some(reason) = self.prompt_feedback.as_ref().and_then(|f| f.block_reason.clone()) {
            return Some(format!("prompt blocked: {reason}"));
        }
        self.candidates
            .iter()
            .filter_map(|c| c.finish_reason.as_deref())
            .find(|r| *r != "STOP")
            .map(|r| format!("finish reason: {r}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_parts() {
        let raw = r#"{
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here you go. "},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}},
                    {"thoughtSignature": "abc"}
                ]},
                "finishReason": "STOP"
            }]
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let inline = resp.first_inline_image().unwrap();
        assert_eq!(inline.mime_type.as_deref(), Some("image/png"));
        assert_eq!(resp.text(), "Here you go. ");
        assert_eq!(resp.refusal_reason(), None);
    }

    #[test]
    fn reports_block_and_finish_reasons() {
        let blocked: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert!(blocked.candidates.is_empty());
        assert_eq!(blocked.refusal_reason().as_deref(), Some("prompt blocked: SAFETY"));

        let stopped: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "IMAGE_SAFETY"}]}"#).unwrap();
        assert!(stopped.first_inline_image().is_none());
        assert_eq!(stopped.refusal_reason().as_deref(), Some("finish reason: IMAGE_SAFETY"));
    }

    #[test]
    fn raw_listing_tolerates_missing_fields() {
        let listing: RawListing =
            serde_json::from_str(r#"{"title": "Flannel", "extracted_price": 19.5}"#).unwrap();
        assert_eq!(listing.extracted_price, Some(Price::Amount(19.5)));
        assert!(listing.thumbnail.is_none());
    }
}
