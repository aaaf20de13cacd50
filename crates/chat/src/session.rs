//! The turn driver.
//!
//! A `ChatSession` owns the session state explicitly: the message log, the
//! context selection and the generation settings. `submit` takes `&mut self`,
//! so a second turn cannot start while one is in flight.

use std::sync::Arc;

use chrono::Utc;
use kaputa_core::error::{ChatError, ExtractionError, ProviderError};
use kaputa_core::event::{DomainEvent, EventBus};
use kaputa_core::message::{MessageStore, Turn};
use kaputa_core::provider::{Attachment, Provider};
use kaputa_core::retrieval::Upload;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::{ContextSources, GenerationSettings, PromptAssembler};
use crate::response::{ResponseHandler, ResponseOutcome};
use crate::stream_event::ChatStreamEvent;

/// User input for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl TurnInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

impl From<&str> for TurnInput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for TurnInput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

pub struct ChatSession {
    provider: Arc<dyn Provider>,
    settings: GenerationSettings,
    store: MessageStore,
    sources: ContextSources,
    assembler: PromptAssembler,
    handler: ResponseHandler,
    event_bus: Arc<EventBus>,
    stream: bool,
}

impl ChatSession {
    pub fn new(
        provider: Arc<dyn Provider>,
        settings: GenerationSettings,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            settings,
            store: MessageStore::new(),
            sources: ContextSources::new(),
            assembler: PromptAssembler::new().with_events(event_bus.clone()),
            handler: ResponseHandler::new(),
            event_bus,
            stream: false,
        }
    }

    /// Session wired from configuration: greeting, settings, streaming and
    /// context sources.
    pub fn from_config(
        config: &kaputa_config::AppConfig,
        provider: Arc<dyn Provider>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self::new(provider, GenerationSettings::from_config(config), event_bus)
            .with_sources(ContextSources::from_config(config))
            .with_streaming(config.stream)
            .with_greeting(config.chat.greeting.clone())
    }

    /// Seed the assistant greeting (no-op if the log already has turns).
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.store.seed(greeting);
        self
    }

    pub fn with_sources(mut self, sources: ContextSources) -> Self {
        self.sources = sources;
        self
    }

    /// Resume from a previously persisted log.
    pub fn with_store(mut self, store: MessageStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn sources(&self) -> &ContextSources {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut ContextSources {
        &mut self.sources
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Explicit user reset: back to the greeting (or empty).
    pub fn reset(&mut self) {
        info!(turns = self.store.len(), "Resetting conversation");
        self.store.reset();
    }

    /// Extract and select a document, reporting failures at upload time.
    pub async fn load_document(&mut self, upload: &Upload) -> Result<String, ExtractionError> {
        let result = self.sources.load_document(upload).await;
        self.report_artifact(&upload.name, &result);
        result
    }

    /// Fetch and select a transcript, reporting failures at load time.
    pub async fn load_transcript(&mut self, media_id: &str) -> Result<String, ExtractionError> {
        let result = self.sources.load_transcript(media_id).await;
        self.report_artifact(media_id, &result);
        result
    }

    fn report_artifact(&self, label: &str, result: &Result<String, ExtractionError>) {
        match result {
            Ok(id) => {
                let chars = self
                    .sources
                    .artifacts()
                    .text(id)
                    .map(|t| t.chars().count())
                    .unwrap_or(0);
                self.event_bus.publish(DomainEvent::ArtifactExtracted {
                    artifact_id: id.clone(),
                    chars,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: format!("extraction:{label}"),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Run one turn end to end.
    ///
    /// Returns `Err` only when the turn was rejected before anything was sent
    /// (blank input). Upstream failures and cancellation come back as a
    /// [`ResponseOutcome`] and are also reported on `events`.
    pub async fn submit(
        &mut self,
        input: impl Into<TurnInput>,
        events: &mpsc::Sender<ChatStreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<ResponseOutcome, ChatError> {
        let input = input.into();
        let request = self
            .assembler
            .assemble(&mut self.store, &self.sources, &input.text, input.attachments)
            .await?;

        info!(
            mode = %request.mode,
            context = %request.context,
            history = request.history.len(),
            provider = self.provider.name(),
            "Submitting turn"
        );
        self.event_bus.publish(DomainEvent::TurnSubmitted {
            mode: request.mode.to_string(),
            context: request.context.to_string(),
            content_preview: input.text.chars().take(80).collect(),
            timestamp: Utc::now(),
        });
        let _ = events
            .send(ChatStreamEvent::Started {
                mode: request.mode,
                context: request.context,
            })
            .await;

        let model = self.settings.model.clone();
        let provider_request = request.into_provider_request(&self.settings, self.stream);

        let outcome = if self.stream {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                opened = self.provider.stream(provider_request) => Some(opened),
            };
            match opened {
                None => ResponseOutcome::Cancelled,
                Some(Ok(chunks)) => {
                    self.handler
                        .consume(&mut self.store, chunks, &model, events, cancel)
                        .await
                }
                Some(Err(e)) => self.handler.handle(&mut self.store, Err(e)),
            }
        } else {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.provider.complete(provider_request) => Some(result),
            };
            match result {
                None => ResponseOutcome::Cancelled,
                Some(result) => self.handler.handle(&mut self.store, result),
            }
        };

        self.report_outcome(&outcome, &model, events).await;
        Ok(outcome)
    }

    /// Submit without a UI: no event consumer, no cancellation.
    ///
    /// Upstream failures become `ChatError::Upstream`.
    pub async fn ask(&mut self, input: impl Into<TurnInput>) -> Result<Turn, ChatError> {
        let (events, _) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        match self.submit(input, &events, &cancel).await? {
            ResponseOutcome::Replied { turn, .. } => Ok(turn),
            ResponseOutcome::Failed(e) => Err(ChatError::Upstream(e)),
            ResponseOutcome::Cancelled => Err(ChatError::Upstream(
                ProviderError::StreamInterrupted("cancelled".into()),
            )),
        }
    }

    async fn report_outcome(
        &self,
        outcome: &ResponseOutcome,
        model: &str,
        events: &mpsc::Sender<ChatStreamEvent>,
    ) {
        let event = match outcome {
            ResponseOutcome::Replied { turn, usage } => {
                info!(turn_id = %turn.id, chars = turn.content.len(), "Reply appended");
                self.event_bus.publish(DomainEvent::ResponseGenerated {
                    model: model.to_string(),
                    tokens_used: usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
                    timestamp: Utc::now(),
                });
                ChatStreamEvent::Done {
                    turn_id: turn.id.clone(),
                    model: model.to_string(),
                    usage: usage.clone(),
                }
            }
            ResponseOutcome::Failed(e) => {
                warn!(error = %e, "Turn failed");
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: "turn".into(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                ChatStreamEvent::Error {
                    message: e.to_string(),
                }
            }
            ResponseOutcome::Cancelled => {
                info!("Turn cancelled");
                ChatStreamEvent::Cancelled
            }
        };
        let _ = events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kaputa_core::message::Speaker;
    use kaputa_core::provider::{ProviderRequest, ProviderResponse, StreamChunk};
    use std::sync::Mutex;

    /// Replies with scripted text (or errors) and records every request.
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String, ProviderError>>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            let mut replies = replies;
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request);
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("default".into()));
            next.map(|text| ProviderResponse {
                text,
                usage: None,
                model: "scripted-1".into(),
                finish_reason: Some("STOP".into()),
            })
        }
    }

    /// Streams two chunks, then hangs until the receiver goes away.
    struct HangingStream;

    #[async_trait]
    impl Provider for HangingStream {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("stream only".into()))
        }

        async fn stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                for part in ["Once upon", " a time"] {
                    let chunk = StreamChunk {
                        content: Some(part.into()),
                        ..Default::default()
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                tx.closed().await;
            });
            Ok(rx)
        }
    }

    fn session(provider: Arc<dyn Provider>) -> ChatSession {
        ChatSession::new(
            provider,
            GenerationSettings::new("test-model"),
            Arc::new(EventBus::default()),
        )
        .with_greeting("Hello! I'm Kaputa.")
    }

    #[tokio::test]
    async fn greeting_scenario() {
        let provider = ScriptedProvider::new(vec![Ok("Hi!".into())]);
        let mut chat = session(provider.clone());

        let turn = chat.ask("Hello").await.unwrap();
        assert_eq!(turn.content, "Hi!");

        let log: Vec<_> = chat
            .store()
            .history()
            .iter()
            .map(|t| (t.speaker, t.content.as_str()))
            .collect();
        assert_eq!(
            log,
            [
                (Speaker::Assistant, "Hello! I'm Kaputa."),
                (Speaker::User, "Hello"),
                (Speaker::Assistant, "Hi!"),
            ]
        );

        let sent = provider.requests();
        assert_eq!(sent[0].turns.len(), 2);
        assert_eq!(sent[0].turns[1].content, "Hello");
    }

    #[tokio::test]
    async fn error_isolation() {
        let provider = ScriptedProvider::new(vec![
            Ok("one".into()),
            Ok("two".into()),
            Err(ProviderError::Timeout("120s".into())),
            Ok("four".into()),
        ]);
        let mut chat = session(provider.clone());

        chat.ask("q1").await.unwrap();
        chat.ask("q2").await.unwrap();
        let err = chat.ask("q3").await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream(ProviderError::Timeout(_))));
        assert_eq!(chat.store().last().unwrap().content, "q3");

        let turn = chat.ask("q4").await.unwrap();
        assert_eq!(turn.content, "four");
        // greeting + 2 * 2 + q3 + q4 + four
        assert_eq!(chat.store().len(), 8);

        let last = provider.requests().pop().unwrap();
        let bodies: Vec<_> = last.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(bodies.iter().filter(|c| **c == "q4").count(), 1);
        assert!(bodies.contains(&"q3"));
    }

    #[tokio::test]
    async fn empty_input_never_reaches_provider() {
        let provider = ScriptedProvider::new(vec![]);
        let mut chat = session(provider.clone());

        let err = chat.ask("   ").await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyInput));
        assert!(provider.requests().is_empty());
        assert_eq!(chat.store().len(), 1);
    }

    #[tokio::test]
    async fn events_bracket_the_turn() {
        let provider = ScriptedProvider::new(vec![Ok("Hi!".into())]);
        let mut chat = session(provider);
        let (tx, mut rx) = mpsc::channel(16);

        chat.submit("Hello", &tx, &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds, ["started", "done"]);
    }

    #[tokio::test]
    async fn failure_emits_error_event() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::AuthenticationFailed(
            "bad key".into(),
        ))]);
        let mut chat = session(provider);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = chat
            .submit("Hello", &tx, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, ResponseOutcome::Failed(_)));

        drop(tx);
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(ChatStreamEvent::Error { .. })));
    }

    #[tokio::test]
    async fn cancelled_stream_appends_nothing() {
        let mut chat = session(Arc::new(HangingStream)).with_streaming(true);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let watcher = {
            let cancel = cancel.clone();
            async move {
                let mut seen = Vec::new();
                while let Some(event) = rx.recv().await {
                    if matches!(event, ChatStreamEvent::Chunk { .. }) && seen.len() == 2 {
                        cancel.cancel();
                    }
                    let terminal = event.is_terminal();
                    seen.push(event.event_type());
                    if terminal {
                        break;
                    }
                }
                seen
            }
        };

        let (outcome, seen) = tokio::join!(chat.submit("tell me a story", &tx, &cancel), watcher);

        assert!(matches!(outcome.unwrap(), ResponseOutcome::Cancelled));
        assert_eq!(seen.first(), Some(&"started"));
        assert_eq!(seen.last(), Some(&"cancelled"));
        assert_eq!(chat.store().len(), 2);
        assert_eq!(chat.store().last().unwrap().speaker, Speaker::User);
    }

    #[tokio::test]
    async fn reset_restores_greeting() {
        let provider = ScriptedProvider::new(vec![Ok("Hi!".into())]);
        let mut chat = session(provider);
        chat.ask("Hello").await.unwrap();

        chat.reset();
        assert_eq!(chat.store().len(), 1);
        assert_eq!(chat.store().history()[0].content, "Hello! I'm Kaputa.");
    }
}
