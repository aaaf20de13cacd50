//! # Kaputa Core
//!
//! Domain types, traits, and error definitions for the Kaputa chat assistant.
//! This crate has **no HTTP or UI dependencies**. It defines the turn log,
//! the model-client contract and the retrieval collaborators that every other
//! crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model API, web search, document extraction,
//! transcript fetch) is a trait here. Implementations live in their
//! respective crates, so the chat core can be tested with mocks and never
//! needs a UI harness.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use error::{ChatError, Error, ExtractionError, ProviderError, Result, SearchError};
pub use event::{DomainEvent, EventBus};
pub use message::{MessageStore, Speaker, Turn};
pub use provider::{
    Attachment, AttachmentKind, ModelInfo, Provider, ProviderRequest, ProviderResponse,
    StreamChunk, Usage,
};
pub use retrieval::{DocumentExtractor, SearchClient, SearchHit, TranscriptClient, Upload};
