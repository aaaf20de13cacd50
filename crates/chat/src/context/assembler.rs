//! Prompt assembly: what gets sent upstream for one turn.
//!
//! The assembler validates input, picks one context source, renders the
//! body, appends the user turn and decides between a single-shot call and a
//! history-carrying chat call.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use kaputa_core::error::ChatError;
use kaputa_core::event::{DomainEvent, EventBus};
use kaputa_core::message::{MessageStore, Speaker, Turn};
use kaputa_core::provider::{Attachment, ProviderRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::source::{ContextKind, ContextSources};

/// How a turn is sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Only the current body; no prior turns.
    SingleShot,
    /// Prior turns plus the current body.
    ChatWithHistory,
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleShot => f.write_str("single-shot"),
            Self::ChatWithHistory => f.write_str("chat-with-history"),
        }
    }
}

/// The exact payload for one turn.
///
/// `history` never contains the turn that `body` represents.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub mode: RequestMode,
    pub history: Vec<Turn>,
    pub body: String,
    pub context: ContextKind,
    pub attachments: Vec<Attachment>,
}

/// Model-side knobs applied to every request in a session.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub system_instruction: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GenerationSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn from_config(config: &kaputa_config::AppConfig) -> Self {
        Self {
            model: config.model().to_string(),
            system_instruction: config.chat.system_prompt.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
        }
    }
}

impl OutboundRequest {
    /// Lower into a provider request: history first, then the body as the
    /// final user turn.
    pub fn into_provider_request(self, settings: &GenerationSettings, stream: bool) -> ProviderRequest {
        let mut turns = self.history;
        turns.push(Turn::user(self.body));

        ProviderRequest {
            model: settings.model.clone(),
            system_instruction: settings.system_instruction.clone(),
            turns,
            attachments: self.attachments,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            stream,
        }
    }
}

/// Render context and question into one labelled body.
pub fn render_body(kind: ContextKind, context: &str, input: &str) -> String {
    match kind {
        ContextKind::None => input.to_string(),
        ContextKind::Document => format!("Context:\n{context}\n\nQuestion:\n{input}"),
        ContextKind::Web => format!("Web search results:\n{context}\n\nQuestion:\n{input}"),
        ContextKind::Transcript => format!("Transcript:\n{context}\n\nQuestion:\n{input}"),
    }
}

#[derive(Default)]
pub struct PromptAssembler {
    events: Option<Arc<EventBus>>,
}

impl PromptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the outbound request for `input` and append the user turn.
    ///
    /// Blank input fails with `EmptyInput` before any context is fetched or
    /// the store is touched.
    pub async fn assemble(
        &self,
        store: &mut MessageStore,
        sources: &ContextSources,
        input: &str,
        attachments: Vec<Attachment>,
    ) -> Result<OutboundRequest, ChatError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let source = sources.select(!attachments.is_empty());
        let payload = source.fetch(input).await;

        if let Some(reason) = &payload.degraded {
            warn!(source = %payload.kind, reason = %reason, "Context degraded to plain input");
            if let Some(bus) = &self.events {
                bus.publish(DomainEvent::ContextDegraded {
                    source: payload.kind.to_string(),
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
            }
        }

        let (context, body) = match &payload.text {
            Some(text) => (payload.kind, render_body(payload.kind, text, input)),
            None => (ContextKind::None, input.to_string()),
        };

        let mode = if context == ContextKind::None && attachments.is_empty() {
            RequestMode::ChatWithHistory
        } else {
            RequestMode::SingleShot
        };

        store.append(Speaker::User, input)?;

        let history = match mode {
            RequestMode::ChatWithHistory => store.history_excluding_last().to_vec(),
            RequestMode::SingleShot => Vec::new(),
        };

        debug!(
            mode = %mode,
            context = %context,
            history = history.len(),
            body_chars = body.len(),
            "Assembled outbound request"
        );

        Ok(OutboundRequest {
            mode,
            history,
            body,
            context,
            attachments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::artifact::tests::CountingExtractor;
    use crate::context::source::tests::StubSearch;
    use kaputa_core::retrieval::Upload;
    use std::sync::atomic::Ordering;

    fn seeded() -> MessageStore {
        MessageStore::with_greeting("Hi, I'm Kaputa.")
    }

    #[tokio::test]
    async fn plain_turn_uses_history_without_current() {
        let mut store = seeded();
        let sources = ContextSources::new();

        let req = PromptAssembler::new()
            .assemble(&mut store, &sources, "Hello", vec![])
            .await
            .unwrap();

        assert_eq!(req.mode, RequestMode::ChatWithHistory);
        assert_eq!(req.body, "Hello");
        assert_eq!(req.history.len(), 1);
        assert_eq!(req.history[0].content, "Hi, I'm Kaputa.");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn history_never_contains_body() {
        let mut store = seeded();
        let sources = ContextSources::new();
        let assembler = PromptAssembler::new();

        for i in 0..5 {
            let input = format!("question {i}");
            let req = assembler
                .assemble(&mut store, &sources, &input, vec![])
                .await
                .unwrap();
            assert!(req.history.iter().all(|t| t.content != req.body));
            assert_eq!(req.history.len(), store.len() - 1);
            store.append(Speaker::Assistant, format!("answer {i}")).unwrap();
        }
    }

    #[tokio::test]
    async fn blank_input_touches_nothing() {
        let search = Arc::new(StubSearch::with_hits(&[("t", "s")]));
        let mut sources = ContextSources::new().with_search(search.clone(), 3);
        sources.set_web_search(true);
        let mut store = seeded();

        let err = PromptAssembler::new()
            .assemble(&mut store, &sources, "  \n ", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::EmptyInput));
        assert_eq!(store.len(), 1);
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn document_turn_is_single_shot() {
        let extractor = Arc::new(CountingExtractor::returning(
            "Photosynthesis converts light to energy.",
        ));
        let mut sources = ContextSources::new().with_extractor(extractor);
        sources
            .load_document(&Upload::new("bio.txt", b"bio".to_vec()))
            .await
            .unwrap();
        let mut store = seeded();

        let req = PromptAssembler::new()
            .assemble(&mut store, &sources, "Summarize", vec![])
            .await
            .unwrap();

        assert_eq!(req.mode, RequestMode::SingleShot);
        assert_eq!(req.context, ContextKind::Document);
        assert_eq!(
            req.body,
            "Context:\nPhotosynthesis converts light to energy.\n\nQuestion:\nSummarize"
        );
        assert!(req.history.is_empty());
        assert_eq!(store.last().unwrap().content, "Summarize");
    }

    #[tokio::test]
    async fn web_wins_over_document() {
        let extractor = Arc::new(CountingExtractor::returning("doc"));
        let search = Arc::new(StubSearch::with_hits(&[("Rust", "A language")]));
        let mut sources = ContextSources::new()
            .with_extractor(extractor)
            .with_search(search, 3);
        sources
            .load_document(&Upload::new("a.md", b"a".to_vec()))
            .await
            .unwrap();
        sources.set_web_search(true);
        let mut store = MessageStore::new();

        let req = PromptAssembler::new()
            .assemble(&mut store, &sources, "What is Rust?", vec![])
            .await
            .unwrap();

        assert_eq!(req.context, ContextKind::Web);
        assert!(req.body.starts_with("Web search results:\n1. Rust\nA language"));
        assert!(!req.body.contains("doc"));
    }

    #[tokio::test]
    async fn failed_search_falls_back_to_chat() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let mut sources = ContextSources::new().with_search(Arc::new(StubSearch::failing()), 3);
        sources.set_web_search(true);
        let mut store = seeded();

        let req = PromptAssembler::new()
            .with_events(bus)
            .assemble(&mut store, &sources, "news today", vec![])
            .await
            .unwrap();

        assert_eq!(req.body, "news today");
        assert_eq!(req.context, ContextKind::None);
        assert_eq!(req.mode, RequestMode::ChatWithHistory);

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::ContextDegraded { source, .. } if source == "web"
        ));
    }

    #[tokio::test]
    async fn attachment_forces_single_shot_without_context() {
        let extractor = Arc::new(CountingExtractor::returning("doc"));
        let mut sources = ContextSources::new().with_extractor(extractor);
        sources
            .load_document(&Upload::new("a.txt", b"a".to_vec()))
            .await
            .unwrap();
        let mut store = seeded();

        let req = PromptAssembler::new()
            .assemble(
                &mut store,
                &sources,
                "What is in this picture?",
                vec![Attachment::image("image/png", vec![1, 2, 3])],
            )
            .await
            .unwrap();

        assert_eq!(req.mode, RequestMode::SingleShot);
        assert_eq!(req.context, ContextKind::None);
        assert_eq!(req.body, "What is in this picture?");
        assert_eq!(req.attachments.len(), 1);
    }

    #[tokio::test]
    async fn provider_request_ends_with_body() {
        let mut store = seeded();
        let req = PromptAssembler::new()
            .assemble(&mut store, &ContextSources::new(), "Hello", vec![])
            .await
            .unwrap();

        let mut settings = GenerationSettings::new("gemini-2.0-flash");
        settings.system_instruction = Some("Be brief.".into());
        let pr = req.into_provider_request(&settings, true);

        assert_eq!(pr.model, "gemini-2.0-flash");
        assert_eq!(pr.turns.len(), 2);
        assert_eq!(pr.turns[0].speaker, Speaker::Assistant);
        assert_eq!(pr.turns[1].content, "Hello");
        assert_eq!(pr.system_instruction.as_deref(), Some("Be brief."));
        assert!(pr.stream);
    }

    #[test]
    fn templates_label_context_before_question() {
        assert_eq!(render_body(ContextKind::None, "ignored", "q"), "q");
        assert_eq!(
            render_body(ContextKind::Transcript, "captions", "q"),
            "Transcript:\ncaptions\n\nQuestion:\nq"
        );
    }

    #[test]
    fn settings_use_the_provider_model_override() {
        let mut config = kaputa_config::AppConfig::default();
        config.providers.insert(
            "gemini".into(),
            kaputa_config::ProviderConfig {
                api_key: None,
                api_url: None,
                default_model: Some("gemini-1.5-pro".into()),
            },
        );

        let settings = GenerationSettings::from_config(&config);
        assert_eq!(settings.model, "gemini-1.5-pro");
    }
}
