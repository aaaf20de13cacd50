//! Google Gemini native provider implementation.
//!
//! Uses the Generative Language REST API directly.
//!
//! Features:
//! - `x-goog-api-key` header authentication
//! - `systemInstruction` as a top-level field
//! - `user` / `model` content roles, consecutive same-role turns merged
//! - `inline_data` parts for image and audio attachments
//! - Streaming via `streamGenerateContent?alt=sse`
//! - Model listing with `supportedGenerationMethods`

use async_trait::async_trait;
use base64::Engine;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use kaputa_core::error::ProviderError;
use kaputa_core::message::{Speaker, Turn};
use kaputa_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` provider.
pub struct GeminiProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a new Gemini provider with a 120s request timeout.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_timeout(api_key, std::time::Duration::from_secs(120))
    }

    /// Create a provider with a custom request timeout.
    pub fn with_timeout(api_key: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            name: "gemini".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Model path segment; accepts both "gemini-x" and "models/gemini-x".
    fn model_path(model: &str) -> String {
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        }
    }

    /// Convert turns (plus the last turn's attachments) to Gemini `contents`.
    ///
    /// Gemini expects alternating roles, so consecutive turns from the same
    /// speaker (e.g. a user turn whose reply failed, followed by a new user
    /// turn) are merged into one content with several parts.
    fn to_api_contents(turns: &[Turn], attachments: &[Attachment]) -> Vec<ApiContent> {
        let mut contents: Vec<ApiContent> = Vec::new();

        for turn in turns {
            let role = match turn.speaker {
                Speaker::User => "user",
                Speaker::Assistant => "model",
            };
            if turn.content.is_empty() {
                continue;
            }
            let part = ApiPart::text(&turn.content);
            match contents.last_mut() {
                Some(last) if last.role == role => last.parts.push(part),
                _ => contents.push(ApiContent {
                    role: role.into(),
                    parts: vec![part],
                }),
            }
        }

        if !attachments.is_empty() {
            let inline: Vec<ApiPart> = attachments
                .iter()
                .map(|a| ApiPart {
                    text: None,
                    inline_data: Some(ApiInlineData {
                        mime_type: a.mime_type.clone(),
                        data: base64::engine::general_purpose::STANDARD.encode(&a.data),
                    }),
                })
                .collect();
            match contents.last_mut() {
                Some(last) if last.role == "user" => last.parts.extend(inline),
                _ => contents.push(ApiContent {
                    role: "user".into(),
                    parts: inline,
                }),
            }
        }

        contents
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "contents": Self::to_api_contents(&request.turns, &request.attachments),
            "generationConfig": {
                "temperature": request.temperature,
            },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["generationConfig"]["maxOutputTokens"] = serde_json::json!(max_tokens);
        }

        if let Some(system) = request.system_instruction.as_deref().filter(|s| !s.is_empty()) {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": system }]
            });
        }

        body
    }

    /// Map a non-success HTTP status to a provider error.
    fn status_error(status: u16, body: &str) -> ProviderError {
        let message = serde_json::from_str::<ApiErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());

        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => ProviderError::AuthenticationFailed(message),
            404 => ProviderError::ModelNotFound(message),
            _ => ProviderError::ApiError {
                status_code: status,
                message,
            },
        }
    }

    fn map_send_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }

    /// Concatenate the text parts of the first candidate.
    fn candidate_text(response: &ApiResponse) -> Option<String> {
        let candidate = response.candidates.first()?;
        let content = candidate.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        Some(text)
    }

    /// Turn one SSE `data:` payload into a stream chunk.
    ///
    /// Returns `None` for payloads that carry neither text nor a finish
    /// reason, so keep-alive events are skipped.
    fn parse_stream_event(data: &str) -> Result<Option<StreamChunk>, ProviderError> {
        if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(data) {
            return Err(ProviderError::StreamInterrupted(envelope.error.message));
        }

        let event: ApiResponse = serde_json::from_str(data)
            .map_err(|e| ProviderError::MalformedResponse(format!("Bad stream event: {e}")))?;

        let text = Self::candidate_text(&event).filter(|t| !t.is_empty());
        let finished = event
            .candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .is_some();

        if text.is_none() && !finished {
            return Ok(None);
        }

        Ok(Some(StreamChunk {
            content: text,
            done: false,
            usage: event.usage_metadata.map(Usage::from),
        }))
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!(
            "{}/{}:generateContent",
            self.base_url,
            Self::model_path(&request.model)
        );
        let body = Self::build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            turns = request.turns.len(),
            attachments = request.attachments.len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gemini returned error");
            return Err(Self::status_error(status, &error_body));
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
        })?;

        if let Some(feedback) = api_response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ProviderError::MalformedResponse(format!(
                "Prompt blocked: {feedback}"
            )));
        }

        let text = Self::candidate_text(&api_response).ok_or_else(|| {
            ProviderError::MalformedResponse("No candidates in response".into())
        })?;

        let finish_reason = api_response
            .candidates
            .first()
            .and_then(|c| c.finish_reason.clone());

        Ok(ProviderResponse {
            text,
            usage: api_response.usage_metadata.map(Usage::from),
            model: api_response.model_version.unwrap_or(request.model),
            finish_reason,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let url = format!(
            "{}/{}:streamGenerateContent?alt=sse",
            self.base_url,
            Self::model_path(&request.model)
        );
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gemini streaming error");
            return Err(Self::status_error(status, &error_body));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE event stream and forward parsed chunks
        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            let mut last_usage: Option<Usage> = None;

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

                match Self::parse_stream_event(event.data.trim()) {
                    Ok(Some(mut chunk)) => {
                        if let Some(usage) = chunk.usage.take() {
                            last_usage = Some(usage);
                        }
                        if chunk.content.is_some() && tx.send(Ok(chunk)).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                    Ok(None) => {}
                    Err(ProviderError::MalformedResponse(reason)) => {
                        trace!(
                            provider = %provider_name,
                            error = %reason,
                            "Ignoring unparseable SSE event"
                        );
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            // Gemini ends the stream by closing it; no sentinel event
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    done: true,
                    usage: last_usage,
                }))
                .await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<ModelInfo>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = vec![("pageSize", "1000".into())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .client
                .get(&url)
                .header("x-goog-api-key", &self.api_key)
                .query(&query)
                .send()
                .await
                .map_err(Self::map_send_error)?;

            let status = response.status().as_u16();
            if status != 200 {
                let error_body = response.text().await.unwrap_or_default();
                return Err(Self::status_error(status, &error_body));
            }

            let page: ApiModelList = response.json().await.map_err(|e| {
                ProviderError::MalformedResponse(format!("Failed to parse model list: {e}"))
            })?;

            models.extend(page.models.into_iter().map(|m| ModelInfo {
                name: m.name,
                supported_methods: m.supported_generation_methods,
            }));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(models)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .query(&[("pageSize", "1")])
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Ok(response.status().is_success())
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<ApiInlineData>,
}

impl ApiPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiModelList {
    #[serde(default)]
    models: Vec<ApiModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiModel {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(turns: Vec<Turn>) -> ProviderRequest {
        ProviderRequest {
            model: "gemini-2.0-flash".into(),
            system_instruction: None,
            turns,
            attachments: vec![],
            temperature: 0.7,
            max_tokens: Some(256),
            stream: false,
        }
    }

    #[test]
    fn constructor_defaults() {
        let provider = GeminiProvider::new("key");
        assert_eq!(provider.name(), "gemini");
        assert!(provider.base_url.contains("generativelanguage.googleapis.com"));

        let proxied = GeminiProvider::new("key").with_base_url("http://localhost:9000/v1beta/");
        assert_eq!(proxied.base_url, "http://localhost:9000/v1beta");
    }

    #[test]
    fn model_path_accepts_both_forms() {
        assert_eq!(GeminiProvider::model_path("gemini-2.0-flash"), "models/gemini-2.0-flash");
        assert_eq!(GeminiProvider::model_path("models/gemini-pro"), "models/gemini-pro");
    }

    #[test]
    fn turns_map_to_user_and_model_roles() {
        let contents = GeminiProvider::to_api_contents(
            &[Turn::assistant("Welcome"), Turn::user("Hello")],
            &[],
        );
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].role, "model");
        assert_eq!(contents[1].role, "user");
        assert_eq!(contents[1].parts[0].text.as_deref(), Some("Hello"));
    }

    #[test]
    fn consecutive_same_role_turns_are_merged() {
        let contents = GeminiProvider::to_api_contents(
            &[Turn::user("first try"), Turn::user("second try")],
            &[],
        );
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].parts.len(), 2);
    }

    #[test]
    fn attachments_become_inline_data_on_the_user_turn() {
        let contents = GeminiProvider::to_api_contents(
            &[Turn::user("What is in this photo?")],
            &[Attachment::image("image/png", vec![1, 2, 3])],
        );
        assert_eq!(contents.len(), 1);
        let inline = contents[0].parts[1].inline_data.as_ref().unwrap();
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "AQID");
    }

    #[test]
    fn body_carries_system_instruction_and_generation_config() {
        let mut req = request(vec![Turn::user("Hi")]);
        req.system_instruction = Some("Be brief.".into());
        let body = GeminiProvider::build_body(&req);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(body["contents"][0]["role"], "user");
        assert!(body["contents"][0]["parts"][0].get("inline_data").is_none());
    }

    #[test]
    fn parse_complete_response() {
        let data = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hi"}, {"text": "!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6},
            "modelVersion": "gemini-2.0-flash-001"
        }"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(GeminiProvider::candidate_text(&parsed).as_deref(), Some("Hi!"));
        assert_eq!(parsed.usage_metadata.unwrap().total_token_count, 6);
    }

    #[test]
    fn parse_response_without_candidates() {
        let data = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert!(GeminiProvider::candidate_text(&parsed).is_none());
        assert_eq!(
            parsed.prompt_feedback.unwrap().block_reason.as_deref(),
            Some("SAFETY")
        );
    }

    #[test]
    fn parse_stream_text_event() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}]}"#;
        let chunk = GeminiProvider::parse_stream_event(data).unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hel"));
        assert!(!chunk.done);
    }

    #[test]
    fn parse_stream_keepalive_event_is_skipped() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[]}}]}"#;
        assert!(GeminiProvider::parse_stream_event(data).unwrap().is_none());
    }

    #[test]
    fn parse_stream_error_event() {
        let data = r#"{"error":{"code":500,"message":"Internal error","status":"INTERNAL"}}"#;
        let err = GeminiProvider::parse_stream_event(data).unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(m) if m == "Internal error"));
    }

    #[test]
    fn status_errors_are_classified() {
        let body = r#"{"error":{"code":403,"message":"API key not valid","status":"PERMISSION_DENIED"}}"#;
        assert!(matches!(
            GeminiProvider::status_error(403, body),
            ProviderError::AuthenticationFailed(m) if m == "API key not valid"
        ));
        assert!(matches!(
            GeminiProvider::status_error(429, ""),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            GeminiProvider::status_error(500, "oops"),
            ProviderError::ApiError { status_code: 500, message } if message == "oops"
        ));
    }

    #[test]
    fn parse_model_list_page() {
        let data = r#"{
            "models": [
                {"name": "models/gemini-2.0-flash", "supportedGenerationMethods": ["generateContent", "countTokens"]},
                {"name": "models/text-embedding-004", "supportedGenerationMethods": ["embedContent"]}
            ],
            "nextPageToken": "abc"
        }"#;
        let parsed: ApiModelList = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.models.len(), 2);
        assert_eq!(parsed.next_page_token.as_deref(), Some("abc"));
        assert_eq!(parsed.models[1].supported_generation_methods, ["embedContent"]);
    }

    async fn collect_text(
        mut rx: tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
    ) -> String {
        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            if let Some(content) = chunk.content {
                text.push_str(&content);
            }
            if chunk.done {
                break;
            }
        }
        text
    }

    #[tokio::test]
    async fn stream_keeps_characters_split_across_reads() {
        let payload = concat!(
            r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":"café කපුට"}]}}]}"#,
            "\r\n\r\n",
            r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":" ok"}]},"finishReason":"STOP"}]}"#,
            "\r\n\r\n",
        );
        let base_url = crate::test_server::serve_sse(crate::test_server::split_inside_char(payload)).await;

        let provider = GeminiProvider::new("key").with_base_url(base_url);
        let rx = provider
            .stream(request(vec![Turn::user("Hello")]))
            .await
            .unwrap();

        assert_eq!(collect_text(rx).await, "café කපුට ok");
    }
}
