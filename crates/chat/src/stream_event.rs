//! Turn-level streaming events.
//!
//! `ChatStreamEvent` wraps provider-level stream chunks into the events a UI
//! needs to drive a busy indicator and a progressive reply buffer:
//! - `started`   — the turn was accepted and sent upstream
//! - `chunk`     — partial reply text
//! - `done`      — the reply was appended to the history
//! - `error`     — the turn failed; nothing was appended
//! - `cancelled` — the turn was cancelled; the partial reply was discarded

use kaputa_core::provider::Usage;
use serde::{Deserialize, Serialize};

use crate::context::{ContextKind, RequestMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    Started {
        mode: RequestMode,
        context: ContextKind,
    },

    Chunk {
        content: String,
    },

    /// Final metadata for a completed reply.
    Done {
        turn_id: String,
        model: String,
        usage: Option<Usage>,
    },

    Error {
        message: String,
    },

    Cancelled,
}

impl ChatStreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// True for events that end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. } | Self::Cancelled)
    }
}
