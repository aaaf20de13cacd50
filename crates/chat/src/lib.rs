//! Turn processing for Kaputa.
//!
//! Every turn follows the same shallow loop:
//!
//! 1. **Validate** the user input (blank input is rejected outright)
//! 2. **Select** one context source by fixed precedence and fetch its text
//! 3. **Assemble** the body and pick single-shot or chat-with-history mode
//! 4. **Call** the model through the configured provider
//! 5. **Handle** the reply: append it, or surface a turn-scoped error
//!
//! Retrieval failures degrade to plain input; upstream failures never
//! corrupt the message log.

pub mod context;
pub mod response;
pub mod session;
pub mod stream_event;

pub use context::{
    ArtifactCache, ContextKind, ContextPayload, ContextSource, ContextSources, GenerationSettings,
    OutboundRequest, PromptAssembler, RequestMode,
};
pub use response::{ResponseHandler, ResponseOutcome};
pub use session::{ChatSession, TurnInput};
pub use stream_event::ChatStreamEvent;
pub use tokio_util::sync::CancellationToken;
