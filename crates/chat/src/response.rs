//! Response handling: turning model output into an assistant turn.
//!
//! The handler only consumes. It never picks context or re-runs assembly.
//! Failures leave the store untouched so the log stays clean for later
//! context-building.

use kaputa_core::error::ProviderError;
use kaputa_core::message::{MessageStore, Speaker, Turn};
use kaputa_core::provider::{ProviderResponse, StreamChunk, Usage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream_event::ChatStreamEvent;

/// What became of one turn's reply.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    /// The reply was appended to the store.
    Replied { turn: Turn, usage: Option<Usage> },

    /// The model call failed; nothing was appended.
    Failed(ProviderError),

    /// The turn was cancelled mid-flight; the partial reply was dropped.
    Cancelled,
}

impl ResponseOutcome {
    pub fn turn(&self) -> Option<&Turn> {
        match self {
            Self::Replied { turn, .. } => Some(turn),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseHandler;

impl ResponseHandler {
    pub fn new() -> Self {
        Self
    }

    /// Apply a whole (non-streamed) result to the store.
    pub fn handle(
        &self,
        store: &mut MessageStore,
        result: Result<ProviderResponse, ProviderError>,
    ) -> ResponseOutcome {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Model call failed");
                return ResponseOutcome::Failed(e);
            }
        };

        if response.text.trim().is_empty() {
            let reason = match response.finish_reason {
                Some(reason) => format!("empty reply (finish reason: {reason})"),
                None => "empty reply".to_string(),
            };
            warn!(model = %response.model, "{reason}");
            return ResponseOutcome::Failed(ProviderError::MalformedResponse(reason));
        }

        match store.append(Speaker::Assistant, response.text) {
            Ok(turn) => ResponseOutcome::Replied {
                turn: turn.clone(),
                usage: response.usage,
            },
            Err(e) => ResponseOutcome::Failed(ProviderError::MalformedResponse(e.to_string())),
        }
    }

    /// Drain a chunk stream into a provisional buffer and finalize it.
    ///
    /// Each non-empty chunk is forwarded as a `Chunk` event. The buffer is
    /// appended only when the stream reports `done` or closes; cancellation
    /// discards it.
    pub async fn consume(
        &self,
        store: &mut MessageStore,
        mut chunks: mpsc::Receiver<Result<StreamChunk, ProviderError>>,
        model: &str,
        events: &mpsc::Sender<ChatStreamEvent>,
        cancel: &CancellationToken,
    ) -> ResponseOutcome {
        let mut buffer = String::new();
        let mut usage = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(buffered = buffer.len(), "Stream cancelled, discarding partial reply");
                    return ResponseOutcome::Cancelled;
                }
                item = chunks.recv() => match item {
                    Some(Ok(chunk)) => {
                        if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                            buffer.push_str(&content);
                            let _ = events.send(ChatStreamEvent::Chunk { content }).await;
                        }
                        if chunk.usage.is_some() {
                            usage = chunk.usage;
                        }
                        if chunk.done {
                            break;
                        }
                    }
                    Some(Err(e)) => return self.handle(store, Err(e)),
                    None => break,
                }
            }
        }

        self.handle(
            store,
            Ok(ProviderResponse {
                text: buffer,
                usage,
                model: model.to_string(),
                finish_reason: None,
            }),
        )
    }
}
