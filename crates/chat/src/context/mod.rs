//! Turn context: sources of supplementary text, the per-upload cache, and
//! the assembler that turns input plus context into an outbound request.

pub mod artifact;
pub mod assembler;
pub mod source;

pub use artifact::ArtifactCache;
pub use assembler::{GenerationSettings, OutboundRequest, PromptAssembler, RequestMode, render_body};
pub use source::{ContextKind, ContextPayload, ContextSource, ContextSources, DEFAULT_SEARCH_LIMIT};
