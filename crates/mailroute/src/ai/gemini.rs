//! Gemini (Generative Language API) client.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use regex::Regex;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::config::ClassifierSettings;

use super::{Embedder, LanguageModel, ModelError};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of error bodies kept in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    embedding_model: String,
}

impl GeminiClient {
    /// Builds a client from settings, resolving the API key.
    pub fn new(settings: &ClassifierSettings) -> Result<Self, ModelError> {
        let api_key = settings
            .api_key
            .resolve()
            .map_err(|e| ModelError::MissingApiKey(e.to_string()))?;

        Self::with_api_key(
            api_key,
            &settings.base_url,
            &settings.model,
            &settings.embedding_model,
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn with_api_key(
        api_key: SecretString,
        base_url: &str,
        model: &str,
        embedding_model: &str,
        request_timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ModelError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, model, method)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, ModelError> {
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.without_url().to_string()))?;

        let status = response.status();
        let retry_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let text = response
            .text()
            .await
            .map_err(|e| ModelError::Request(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(classify_failure(status, &text, retry_header));
        }

        serde_json::from_str(&text).map_err(|e| ModelError::Decode(e.to_string()))
    }
}

/// Maps a failed response to a typed error.
fn classify_failure(status: StatusCode, body: &str, retry_header: Option<Duration>) -> ModelError {
    let body_excerpt = sanitize_error_body(body);
    if status == StatusCode::TOO_MANY_REQUESTS || throttle_pattern().is_match(body) {
        return ModelError::Throttled {
            message: format!("{}: {}", status, body_excerpt),
            retry_after: parse_retry_delay(body).or(retry_header),
        };
    }
    ModelError::Status {
        status: status.as_u16(),
        body: body_excerpt,
    }
}

fn throttle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)429|quota|rate.?limit|resource.?exhausted").expect("valid regex")
    })
}

/// Reads `"retryDelay": "5s"` from a throttling payload.
///
/// Delays too large for a [`Duration`] saturate to [`Duration::MAX`].
pub fn parse_retry_delay(body: &str) -> Option<Duration> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).expect("valid regex")
    });

    let secs: f64 = pattern.captures(body)?.get(1)?.as_str().parse().ok()?;
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

fn sanitize_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

/// `candidates[0].content.parts[0].text`
fn extract_text(response: &Value) -> Result<String, ModelError> {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ModelError::EmptyResponse)
}

fn extract_embedding(response: &Value) -> Result<Vec<f32>, ModelError> {
    let values = response
        .pointer("/embedding/values")
        .and_then(Value::as_array)
        .ok_or(ModelError::EmptyResponse)?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ModelError::Decode("non-numeric embedding value".to_string()))
        })
        .collect()
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        let response = self
            .post(&self.endpoint(&self.model, "generateContent"), &body)
            .await?;
        let text = extract_text(&response)?;
        debug!("Model '{}' returned {} chars", self.model, text.len());
        Ok(text)
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let model = format!("models/{}", self.embedding_model);
        let body = json!({
            "model": model,
            "content": { "parts": [{ "text": text }] }
        });
        let response = self
            .post(&self.endpoint(&self.embedding_model, "embedContent"), &body)
            .await?;
        extract_embedding(&response)
    }
}
