//! Retrieval adapters for Kaputa.
//!
//! Each adapter implements one of the `kaputa_core::retrieval` contracts:
//! document text extraction, web search and transcript lookup. The chat
//! core only sees the traits, so these can be swapped for test doubles.

pub mod document;
mod markup;
pub mod transcript;
pub mod web_search;

pub use document::TextDocumentExtractor;
pub use transcript::CaptionFileTranscripts;
pub use web_search::WebSearchClient;
