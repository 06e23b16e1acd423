//! Core types for the chat gateway.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

// =============================================================================
// CHAT INPUT
// =============================================================================

/// A single-turn chat: prompt text plus an optional image attachment.
#[derive(Debug, Clone)]
pub struct ChatInput {
    pub text: String,
    pub image: Option<PathBuf>,
}

impl ChatInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(text: impl Into<String>, image: impl AsRef<Path>) -> Self {
        Self {
            text: text.into(),
            image: Some(image.as_ref().to_path_buf()),
        }
    }

    /// Number of characters (not bytes) of text input.
    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

// =============================================================================
// CLIENT OPTIONS
// =============================================================================

/// Per-client overrides passed through the factory.
///
/// Every field is optional; `None` means "use the provider's default" which in
/// turn may come from the environment.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

// =============================================================================
// REQUEST SHAPE
// =============================================================================

/// Where the image part goes relative to the text part in the user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePlacement {
    BeforeText,
    AfterText,
}

/// How the image bytes are put into the `image_url.url` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    /// `data:<mime>;base64,<payload>`
    DataUri,
    /// Bare base64 payload (BigModel accepts this form).
    RawBase64,
}

/// Provider-specific message layout for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct RequestShape {
    pub image_placement: ImagePlacement,
    pub image_encoding: ImageEncoding,
    /// Text-only prompts are sent as a plain string instead of a parts array.
    pub plain_text_when_no_image: bool,
    pub system_prompt: Option<&'static str>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Extra top-level body fields, merged into the request.
    pub extra_body: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for RequestShape {
    fn default() -> Self {
        Self {
            image_placement: ImagePlacement::AfterText,
            image_encoding: ImageEncoding::DataUri,
            plain_text_when_no_image: true,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            extra_body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Parsed completion.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub finish_reason: FinishReason,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency: Duration,
}
