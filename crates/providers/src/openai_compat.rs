//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, and any endpoint exposing
//! `/v1/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Image attachments as `image_url` data URLs, audio as `input_audio`
//! - Model listing and health checks

use async_trait::async_trait;
use base64::Engine;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use kaputa_core::error::ProviderError;
use kaputa_core::message::{Speaker, Turn};
use kaputa_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Replace the HTTP client timeout.
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert the request's system instruction, turns and attachments to
    /// OpenAI API messages. Attachments ride on the final user message.
    fn to_api_messages(
        system_instruction: Option<&str>,
        turns: &[Turn],
        attachments: &[Attachment],
    ) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(turns.len() + 1);

        if let Some(system) = system_instruction.filter(|s| !s.is_empty()) {
            messages.push(ApiMessage {
                role: "system".into(),
                content: ApiContent::Text(system.to_string()),
            });
        }

        let last = turns.len().saturating_sub(1);
        for (i, turn) in turns.iter().enumerate() {
            let role = match turn.speaker {
                Speaker::User => "user",
                Speaker::Assistant => "assistant",
            };

            let content = if i == last && turn.speaker == Speaker::User && !attachments.is_empty() {
                let mut parts = vec![ApiContentPart::Text {
                    text: turn.content.clone(),
                }];
                parts.extend(attachments.iter().map(Self::attachment_part));
                ApiContent::Parts(parts)
            } else {
                ApiContent::Text(turn.content.clone())
            };

            messages.push(ApiMessage {
                role: role.into(),
                content,
            });
        }

        messages
    }

    fn attachment_part(attachment: &Attachment) -> ApiContentPart {
        let data = base64::engine::general_purpose::STANDARD.encode(&attachment.data);
        match attachment.kind {
            AttachmentKind::Image => ApiContentPart::ImageUrl {
                image_url: ApiImageUrl {
                    url: format!("data:{};base64,{}", attachment.mime_type, data),
                },
            },
            AttachmentKind::Audio => ApiContentPart::InputAudio {
                input_audio: ApiInputAudio {
                    data,
                    format: attachment
                        .mime_type
                        .rsplit('/')
                        .next()
                        .unwrap_or("wav")
                        .replace("mpeg", "mp3"),
                },
            },
        }
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(
                request.system_instruction.as_deref(),
                &request.turns,
                &request.attachments,
            ),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    fn status_error(status: u16, body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(Self::status_error(status, error_body));
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            text: choice.message.content.unwrap_or_default(),
            usage,
            model: api_response.model,
            finish_reason: choice.finish_reason,
        })
    }

    async fn list_models(&self) -> std::result::Result<Vec<ModelInfo>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, error_body));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        // OpenAI-style listings don't advertise methods; every entry serves chat
        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str())
                    .map(|id| ModelInfo {
                        name: id.to_string(),
                        supported_methods: vec!["generateContent".into()],
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(Self::status_error(status, error_body));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE event stream and parse chunks
        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                let data = event.data.trim();
                if data.is_empty() {
                    continue;
                }

                // "[DONE]" signals end of stream
                if data == "[DONE]" {
                    let _ = tx.send(Ok(StreamChunk { content: None, done: true, usage: None })).await;
                    return;
                }

                match serde_json::from_str::<StreamResponse>(data) {
                    Ok(stream_resp) => {
                        let content = stream_resp
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.clone())
                            .filter(|c| !c.is_empty());

                        if let Some(content) = content {
                            let chunk = StreamChunk {
                                content: Some(content),
                                done: false,
                                usage: None,
                            };
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }

                        // Usage arrives in the final chunk (stream_options)
                        if let Some(usage) = stream_resp.usage {
                            let chunk = StreamChunk {
                                content: None,
                                done: true,
                                usage: Some(Usage {
                                    prompt_tokens: usage.prompt_tokens,
                                    completion_tokens: usage.completion_tokens,
                                    total_tokens: usage.total_tokens,
                                }),
                            };
                            let _ = tx.send(Ok(chunk)).await;
                            return;
                        }
                    }
                    Err(e) => {
                        trace!(
                            provider = %provider_name,
                            data = %data,
                            error = %e,
                            "Ignoring unparseable SSE chunk"
                        );
                    }
                }
            }

            // Stream ended without [DONE] — send final chunk
            let _ = tx.send(Ok(StreamChunk { content: None, done: true, usage: None })).await;
        });

        Ok(rx)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
    InputAudio { input_audio: ApiInputAudio },
}

#[derive(Debug, Serialize)]
struct ApiImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ApiInputAudio {
    data: String,
    format: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
