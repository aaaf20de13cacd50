//! Domain event system — decoupled observation of the turn lifecycle.
//!
//! Events are published when something interesting happens in a session.
//! The UI shell (or a log sink) can subscribe without the chat core knowing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user turn was accepted and is about to be sent upstream
    TurnSubmitted {
        mode: String,
        context: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// The model produced a reply that was appended to the log
    ResponseGenerated {
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A context source failed and the turn fell back to plain input
    ContextDegraded {
        source: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An uploaded artifact was turned into cached text
    ArtifactExtracted {
        artifact_id: String,
        chars: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn- or upload-scoped error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
