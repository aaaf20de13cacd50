//! Provider trait — the abstraction over hosted LLM backends.
//!
//! A Provider knows how to send one assembled turn (body plus optional
//! history and attachments) to an LLM and get a reply back, either as a
//! complete message or as a stream of text chunks.
//!
//! Implementations: Gemini (native), OpenAI-compatible endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Turn;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gemini-2.0-flash", "gpt-4o-mini")
    pub model: String,

    /// System instruction, sent out-of-band where the API supports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    /// Ordered turns; the last one is the current user body
    pub turns: Vec<Turn>,

    /// Live multimodal input attached to the last turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

/// The kind of a multimodal attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
}

/// Binary input (a photo, a voice clip) sent alongside the turn's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,

    /// MIME type, e.g. "image/png" or "audio/wav"
    pub mime_type: String,

    /// Raw bytes
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn image(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn audio(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: AttachmentKind::Audio,
            mime_type: mime_type.into(),
            data,
        }
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated text
    pub text: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Why generation stopped, as reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A model advertised by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model resource name, e.g. "models/gemini-2.0-flash"
    pub name: String,

    /// Generation methods the model accepts, e.g. "generateContent"
    #[serde(default)]
    pub supported_methods: Vec<String>,
}

impl ModelInfo {
    /// Whether the model can serve ordinary content generation.
    pub fn supports_generation(&self) -> bool {
        self.supported_methods.iter().any(|m| m == "generateContent")
    }
}

/// The core Provider trait.
///
/// Every model backend implements this trait. The chat session calls
/// `complete()` or `stream()` without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.text),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// List models available to this provider's credentials.
    async fn list_models(&self) -> std::result::Result<Vec<ModelInfo>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
