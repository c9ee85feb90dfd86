use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::AnalysisResult;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const MODEL: &str = "gpt-4o";
pub const MAX_TOKENS: u32 = 500;
pub const TEMPERATURE: f32 = 0.2;

/// Calorie estimates above this are kept but logged as suspicious.
pub const IMPLAUSIBLE_CALORIES: u32 = 10_000;

const PROMPT: &str = "Analyze this food image and provide: 1. the food name, \
2. the list of ingredients, 3. the estimated total calories. \
Respond with strict JSON only, no prose and no markdown code fences, \
using exactly these fields: {\"name\": string, \"ingredients\": array of strings, \"calories\": integer}";

const ERROR_BODY_EXCERPT: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("image data is empty")]
    InvalidImageData,
    /// `status` is `None` when the peer did not answer with HTTP at all.
    #[error("vision API returned an invalid response ({}): {body}", .status.map_or_else(|| "not HTTP".to_string(), |s| format!("HTTP {s}")))]
    InvalidResponse {
        status: Option<StatusCode>,
        body: String,
    },
    #[error("could not parse vision API response: {0}")]
    ParsingError(String),
    #[error("network error: {0}")]
    NetworkError(#[source] reqwest::Error),
}

/// Anything that can turn an encoded image into an [`AnalysisResult`].
///
/// [`VisionClient`] talks to the real API; tests substitute canned results.
#[async_trait]
pub trait FoodAnalyzer: Send + Sync {
    async fn analyze(&self, image: &[u8]) -> Result<AnalysisResult, AnalysisError>;
}

/// Connection settings for the vision API, built once at startup.
#[derive(Clone)]
pub struct VisionConfig {
    pub api_key: String,
    pub endpoint: String,
}

impl VisionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

pub struct VisionClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl VisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "calsnap/{} (photo food log)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl FoodAnalyzer for VisionClient {
    async fn analyze(&self, image: &[u8]) -> Result<AnalysisResult, AnalysisError> {
        if image.is_empty() {
            return Err(AnalysisError::InvalidImageData);
        }

        let image_url = format!("data:image/jpeg;base64,{}", BASE64.encode(image));
        let request = ChatRequest {
            model: MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: PROMPT },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                ],
            }],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        debug!(bytes = image.len(), model = MODEL, "sending image for analysis");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "vision API rejected request");
            return Err(AnalysisError::InvalidResponse {
                status: Some(status),
                body: excerpt(&body),
            });
        }

        let body = resp.text().await.map_err(AnalysisError::NetworkError)?;
        parse_response(&body)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<MessageResponse>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// Decode a chat-completions envelope and the food JSON inside its first choice.
pub fn parse_response(body: &str) -> Result<AnalysisResult, AnalysisError> {
    let envelope: ChatResponse = serde_json::from_str(body)
        .map_err(|e| AnalysisError::ParsingError(format!("invalid response envelope: {e}")))?;

    let content = envelope
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AnalysisError::ParsingError("response has no message content".into()))?;

    parse_analysis(&content)
}

/// Parse the model's message text into an [`AnalysisResult`], tolerating code fences.
pub fn parse_analysis(content: &str) -> Result<AnalysisResult, AnalysisError> {
    let cleaned = strip_code_fences(content);
    let result: AnalysisResult = serde_json::from_str(cleaned)
        .map_err(|e| AnalysisError::ParsingError(format!("invalid food JSON: {e}")))?;

    if result.calories > IMPLAUSIBLE_CALORIES {
        warn!(
            calories = result.calories,
            name = %result.name,
            "implausibly high calorie estimate"
        );
    }
    Ok(result)
}

/// Remove a surrounding markdown code fence (with or without a language tag).
/// Text without a fence is returned trimmed.
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);

    // Drop a language tag such as `json`, whether or not a newline follows it.
    let inner = match inner.find('\n') {
        Some(i) if inner[..i].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &inner[i + 1..],
        _ => inner.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    inner.trim()
}

/// A peer that answers with something other than HTTP is a bad response, not
/// a network failure.
fn classify_send_error(err: reqwest::Error) -> AnalysisError {
    if err.is_connect() || err.is_timeout() || !is_malformed_http(&err) {
        return AnalysisError::NetworkError(err);
    }
    warn!(error = %err, "vision API answered with a malformed HTTP response");
    AnalysisError::InvalidResponse {
        status: None,
        body: err.to_string(),
    }
}

fn is_malformed_http(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(e) = source {
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
            return hyper_err.is_parse();
        }
        source = e.source();
    }
    false
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= ERROR_BODY_EXCERPT {
        return body.to_string();
    }
    let end = body
        .char_indices()
        .nth(ERROR_BODY_EXCERPT)
        .map_or(body.len(), |(i, _)| i);
    format!("{}...", &body[..end])
}
