//! Adapter for OpenAI-compatible `/chat/completions` endpoints.
//!
//! All builtin providers speak this wire format; they differ only in base URL,
//! authentication and [`RequestShape`].

use std::io::Read;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ErrorContext, ProviderError};
use super::image::EncodedImage;
use super::types::*;
use super::ChatClient;

/// Maximum allowed response body length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed prompt characters.
const MAX_INPUT_CHARS: usize = 500_000;

/// Retry hint used when a 429 carries no Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

// =============================================================================
// ADAPTER
// =============================================================================

#[derive(Debug)]
pub struct OpenAiCompatClient {
    provider: &'static str,
    model: String,
    base_url: String,
    timeout: Duration,
    headers: HeaderMap,
    shape: RequestShape,
    client: reqwest::Client,
    blocking: OnceLock<reqwest::blocking::Client>,
}

impl OpenAiCompatClient {
    /// Create a client. `api_key` of `None` sends no Authorization header.
    pub fn new(
        provider: &'static str,
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<&str>,
        timeout: Duration,
        shape: RequestShape,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(key) = api_key {
            let auth_value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| ProviderError::config(format!("invalid {provider} API key format")))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers.clone())
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            provider,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            headers,
            shape,
            client,
            blocking: OnceLock::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn shape(&self) -> &RequestShape {
        &self.shape
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    // Built on first use so async-only callers never spin up the blocking runtime.
    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, ProviderError> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .default_headers(self.headers.clone())
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("failed to create HTTP client: {e}")))?;
        Ok(self.blocking.get_or_init(|| client))
    }

    fn build_request<'a>(&'a self, input: &ChatInput) -> Result<ChatApiRequest<'a>, ProviderError> {
        if input.text_len() > MAX_INPUT_CHARS {
            return Err(ProviderError::InvalidRequest(format!(
                "input too large: {} chars (max {MAX_INPUT_CHARS})",
                input.text_len()
            )));
        }

        let image = input.image.as_deref().map(EncodedImage::read).transpose()?;

        let content = match image {
            None if self.shape.plain_text_when_no_image => ApiContent::Text(input.text.clone()),
            None => ApiContent::Parts(vec![ApiPart::text(&input.text)]),
            Some(img) => {
                let image_part = ApiPart::image(img.url(self.shape.image_encoding));
                let text_part = ApiPart::text(&input.text);
                match self.shape.image_placement {
                    ImagePlacement::BeforeText => ApiContent::Parts(vec![image_part, text_part]),
                    ImagePlacement::AfterText => ApiContent::Parts(vec![text_part, image_part]),
                }
            }
        };

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.shape.system_prompt {
            messages.push(ApiMessage {
                role: Role::System,
                content: ApiContent::Parts(vec![ApiPart::text(system)]),
            });
        }
        messages.push(ApiMessage {
            role: Role::User,
            content,
        });

        Ok(ChatApiRequest {
            model: &self.model,
            messages,
            temperature: self.shape.temperature,
            max_tokens: self.shape.max_tokens,
            extra: self.shape.extra_body.as_ref(),
        })
    }

    /// Send the chat and wait for the completion without blocking the executor.
    pub async fn complete(&self, input: &ChatInput) -> Result<ChatCompletion, ProviderError> {
        let api_req = self.build_request(input)?;
        let start = Instant::now();
        debug!(provider = self.provider, model = %self.model, "sending chat request");

        let mut response = self.client.post(self.chat_url()).json(&api_req).send().await?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let request_id = extract_request_id(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    self.provider,
                    format!("response too large: {new_len} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes);
        parse_completion(
            self.provider,
            RawResponse {
                status,
                retry_after,
                request_id,
                body: &body,
            },
            start,
        )
    }

    /// Blocking variant of [`complete`](Self::complete). Must not be called
    /// from inside an async task.
    pub fn complete_blocking(&self, input: &ChatInput) -> Result<ChatCompletion, ProviderError> {
        let api_req = self.build_request(input)?;
        let client = self.blocking_client()?;
        let start = Instant::now();
        debug!(provider = self.provider, model = %self.model, "sending blocking chat request");

        let response = client.post(self.chat_url()).json(&api_req).send()?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let request_id = extract_request_id(response.headers());

        let mut bytes = Vec::new();
        response
            .take(MAX_RESPONSE_LEN as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| ProviderError::provider(self.provider, format!("failed to read body: {e}")))?;
        if bytes.len() > MAX_RESPONSE_LEN {
            return Err(ProviderError::provider(
                self.provider,
                format!("response too large: > {MAX_RESPONSE_LEN} bytes"),
            ));
        }

        let body = String::from_utf8_lossy(&bytes);
        parse_completion(
            self.provider,
            RawResponse {
                status,
                retry_after,
                request_id,
                body: &body,
            },
            start,
        )
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn chat(&self, input: &ChatInput) -> Result<String, ProviderError> {
        self.complete_blocking(input).map(|c| c.content)
    }

    async fn async_chat(&self, input: &ChatInput) -> Result<String, ProviderError> {
        self.complete(input).await.map(|c| c.content)
    }
}

fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(flatten)]
    extra: Option<&'a serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: Role,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

impl ApiPart {
    fn text(text: &str) -> Self {
        ApiPart::Text {
            text: text.to_string(),
        }
    }

    fn image(url: String) -> Self {
        ApiPart::ImageUrl {
            image_url: ApiImageUrl { url },
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(default, deserialize_with = "code_as_string")]
    code: Option<String>,
}

// Providers disagree on whether `code` is a string or a number.
fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

struct RawResponse<'a> {
    status: StatusCode,
    retry_after: Option<Duration>,
    request_id: Option<String>,
    body: &'a str,
}

fn parse_completion(
    provider: &'static str,
    raw: RawResponse<'_>,
    start: Instant,
) -> Result<ChatCompletion, ProviderError> {
    let status = raw.status.as_u16();

    let ctx = ErrorContext::new().with_status(status);
    let ctx = match &raw.request_id {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    };

    if !raw.status.is_success() {
        let api_error = serde_json::from_str::<ChatApiResponse>(raw.body)
            .ok()
            .and_then(|parsed| parsed.error);

        let (message, ctx) = match api_error {
            Some(error) => {
                let ctx = match error.code {
                    Some(code) => ctx.with_code(code),
                    None => ctx,
                };
                (
                    error.message.unwrap_or_else(|| format!("HTTP {status}")),
                    ctx,
                )
            }
            None => (format!("HTTP {status}"), ctx),
        };

        if raw.status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::rate_limited(
                provider,
                raw.retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
                ctx,
            ));
        }
        return Err(ProviderError::provider_with_context(provider, message, ctx));
    }

    let parsed: ChatApiResponse = serde_json::from_str(raw.body)
        .map_err(|e| ProviderError::provider_with_context(provider, format!("invalid JSON: {e}"), ctx.clone()))?;

    // Check for API-level error
    if let Some(error) = parsed.error {
        let ctx = match error.code {
            Some(code) => ctx.with_code(code),
            None => ctx,
        };
        return Err(ProviderError::provider_with_context(
            provider,
            error.message.unwrap_or_default(),
            ctx,
        ));
    }

    let choice = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| ProviderError::provider_with_context(provider, "no choices in response", ctx))?;

    let content = choice
        .message
        .and_then(|m| m.content)
        .unwrap_or_default();

    let (input_tokens, output_tokens) = parsed
        .usage
        .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
        .unwrap_or((0, 0));

    Ok(ChatCompletion {
        content,
        finish_reason: FinishReason::from(choice.finish_reason),
        input_tokens,
        output_tokens,
        latency: start.elapsed(),
    })
}
