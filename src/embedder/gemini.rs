//! Gemini-based embedding client implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{Embed, EmbedError};

/// Default API root for the Generative Language service.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default embedding model.
pub const DEFAULT_MODEL: &str = "models/text-embedding-004";
/// Task type tag for documents being indexed.
pub const DEFAULT_TASK_TYPE: &str = "RETRIEVAL_DOCUMENT";

/// Blocking embeddings client for the Gemini `embedContent` endpoint.
///
/// Each call is a single attempt; retries are the caller's concern.
#[derive(Clone)]
pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    task_type: String,
}

impl GeminiEmbedder {
    /// Builds a new Gemini embeddings client.
    ///
    /// # Arguments
    /// * `api_key` - Value for the `x-goog-api-key` header (usually from `GOOGLE_API_KEY`)
    /// * `base_url` - API root, e.g. [`DEFAULT_BASE_URL`]
    /// * `model` - Model resource name, e.g. `models/text-embedding-004`
    /// * `task_type` - Embedding task tag, e.g. `RETRIEVAL_DOCUMENT`
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        task_type: String,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Google API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");
        let model = if model.starts_with("models/") {
            model
        } else {
            format!("models/{model}")
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key.trim()).context("invalid Google API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Gemini HTTP client")?;
        let endpoint = format!("{}/{}:embedContent", base_url.trim_end_matches('/'), model);
        Ok(Self {
            client,
            endpoint,
            model,
            task_type,
        })
    }

    /// Fully qualified model resource name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Embed for GeminiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request = EmbedContentRequest {
            model: &self.model,
            content: Content {
                parts: [Part { text }],
            },
            task_type: &self.task_type,
        };
        let resp = self.client.post(&self.endpoint).json(&request).send()?;
        let status = resp.status();
        if status.is_success() {
            let parsed: EmbedContentResponse = resp
                .json()
                .map_err(|err| EmbedError::Malformed(err.to_string()))?;
            return Ok(parsed.embedding.values);
        }
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbedError::RateLimited(body));
        }
        Err(EmbedError::Service {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_wire_field_names() {
        let request = EmbedContentRequest {
            model: DEFAULT_MODEL,
            content: Content {
                parts: [Part { text: "hello" }],
            },
            task_type: DEFAULT_TASK_TYPE,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "model": "models/text-embedding-004",
                "content": {"parts": [{"text": "hello"}]},
                "taskType": "RETRIEVAL_DOCUMENT"
            })
        );
    }

    #[test]
    fn normalizes_model_name_into_endpoint() {
        let embedder = GeminiEmbedder::new(
            "key".into(),
            format!("{DEFAULT_BASE_URL}/"),
            "text-embedding-004".into(),
            DEFAULT_TASK_TYPE.into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(embedder.model(), DEFAULT_MODEL);
        assert_eq!(
            embedder.endpoint,
            format!("{DEFAULT_BASE_URL}/models/text-embedding-004:embedContent")
        );
    }

    #[test]
    fn rejects_blank_key() {
        let result = GeminiEmbedder::new(
            "  ".into(),
            DEFAULT_BASE_URL.into(),
            DEFAULT_MODEL.into(),
            DEFAULT_TASK_TYPE.into(),
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }
}
