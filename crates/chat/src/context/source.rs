//! Context sources: where a turn's supplementary text comes from.
//!
//! Precedence when several sources are configured at once, highest first:
//!
//! 1. live multimodal input (an attachment on the turn), no text context
//! 2. the web-search toggle, once a search client is configured
//! 3. the loaded document
//! 4. the loaded transcript
//! 5. plain input
//!
//! Exactly one source is selected per turn. Sources are never concatenated.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kaputa_core::error::ExtractionError;
use kaputa_core::retrieval::{
    DocumentExtractor, SearchClient, SearchHit, TranscriptClient, Upload,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::artifact::ArtifactCache;

/// Default number of web results folded into a turn.
pub const DEFAULT_SEARCH_LIMIT: usize = 3;

/// The kind of context attached to a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    None,
    Document,
    Web,
    Transcript,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Document => "document",
            Self::Web => "web",
            Self::Transcript => "transcript",
        };
        f.write_str(s)
    }
}

/// Result of fetching one source for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPayload {
    pub kind: ContextKind,

    /// Supplementary text; absent when the source is inactive or failed
    pub text: Option<String>,

    /// Why a live source produced nothing
    pub degraded: Option<String>,
}

impl ContextPayload {
    pub fn none() -> Self {
        Self {
            kind: ContextKind::None,
            text: None,
            degraded: None,
        }
    }

    fn present(kind: ContextKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: Some(text.into()),
            degraded: None,
        }
    }

    fn degraded(kind: ContextKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            text: None,
            degraded: Some(reason.into()),
        }
    }

    pub fn is_present(&self) -> bool {
        self.text.is_some()
    }
}

/// One selected source of supplementary text.
#[derive(Clone)]
pub enum ContextSource {
    None,
    Document {
        artifact_id: String,
        text: Option<Arc<str>>,
    },
    Web {
        client: Option<Arc<dyn SearchClient>>,
        limit: usize,
    },
    Transcript {
        artifact_id: String,
        text: Option<Arc<str>>,
    },
}

impl fmt::Debug for ContextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Document { artifact_id, .. } => {
                f.debug_struct("Document").field("artifact_id", artifact_id).finish()
            }
            Self::Web { client, limit } => f
                .debug_struct("Web")
                .field("configured", &client.is_some())
                .field("limit", limit)
                .finish(),
            Self::Transcript { artifact_id, .. } => f
                .debug_struct("Transcript")
                .field("artifact_id", artifact_id)
                .finish(),
        }
    }
}

impl ContextSource {
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::None => ContextKind::None,
            Self::Document { .. } => ContextKind::Document,
            Self::Web { .. } => ContextKind::Web,
            Self::Transcript { .. } => ContextKind::Transcript,
        }
    }

    /// Produce this source's text for `query`.
    ///
    /// Never fails: any retrieval problem comes back as an absent payload
    /// with a `degraded` reason.
    pub async fn fetch(&self, query: &str) -> ContextPayload {
        let kind = self.kind();
        match self {
            Self::None => ContextPayload::none(),
            Self::Document { artifact_id, text } | Self::Transcript { artifact_id, text } => {
                match text {
                    Some(text) => ContextPayload::present(kind, text.as_ref()),
                    None => ContextPayload::degraded(
                        kind,
                        format!("no extracted text for {artifact_id}"),
                    ),
                }
            }
            Self::Web { client, limit } => {
                let Some(client) = client else {
                    return ContextPayload::degraded(kind, "web search is not configured");
                };
                match client.search(query, *limit).await {
                    Ok(hits) if hits.is_empty() => {
                        ContextPayload::degraded(kind, "search returned no results")
                    }
                    Ok(hits) => {
                        debug!(hits = hits.len(), "Web search succeeded");
                        ContextPayload::present(kind, format_hits(&hits))
                    }
                    Err(e) => ContextPayload::degraded(kind, e.to_string()),
                }
            }
        }
    }
}

/// Join search hits as numbered title + snippet pairs.
fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. {}\n{}", i + 1, hit.title, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Session-scoped selection state: which sources are loaded or toggled.
pub struct ContextSources {
    artifacts: ArtifactCache,
    extractor: Option<Arc<dyn DocumentExtractor>>,
    transcripts: Option<Arc<dyn TranscriptClient>>,
    search: Option<Arc<dyn SearchClient>>,
    search_limit: usize,
    web_enabled: bool,
    document: Option<String>,
    transcript: Option<String>,
}

impl Default for ContextSources {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextSources {
    pub fn new() -> Self {
        Self {
            artifacts: ArtifactCache::new(),
            extractor: None,
            transcripts: None,
            search: None,
            search_limit: DEFAULT_SEARCH_LIMIT,
            web_enabled: false,
            document: None,
            transcript: None,
        }
    }

    /// Plain-text extraction plus web search when a search key is configured.
    pub fn from_config(config: &kaputa_config::AppConfig) -> Self {
        let mut sources = Self::new().with_extractor(Arc::new(kaputa_tools::TextDocumentExtractor::new()));
        if config.search.api_key.is_some() {
            let client = kaputa_tools::WebSearchClient::new(
                config.search.api_url.clone(),
                config.search.api_key.clone(),
            )
            .with_timeout(Duration::from_secs(config.request_timeout_secs));
            sources = sources.with_search(Arc::new(client), config.search.max_results);
        }
        sources.set_web_search(config.search.enabled);
        sources
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_transcripts(mut self, client: Arc<dyn TranscriptClient>) -> Self {
        self.transcripts = Some(client);
        self
    }

    pub fn with_search(mut self, client: Arc<dyn SearchClient>, limit: usize) -> Self {
        self.search = Some(client);
        self.search_limit = limit.max(1);
        self
    }

    /// Extract and select a document.
    ///
    /// Extraction runs once per distinct content. On failure the document is
    /// not selected and the error is returned for the UI to show.
    pub async fn load_document(&mut self, upload: &Upload) -> Result<String, ExtractionError> {
        let Some(extractor) = self.extractor.clone() else {
            return Err(ExtractionError::Unsupported(
                "no document extractor configured".into(),
            ));
        };

        let (id, result) = self.artifacts.document(upload, extractor.as_ref()).await;
        match result {
            Ok(text) => {
                info!(artifact = %id, chars = text.chars().count(), "Document loaded");
                self.document = Some(id.clone());
                Ok(id)
            }
            Err(e) => {
                if self.document.as_deref() == Some(id.as_str()) {
                    self.document = None;
                }
                Err(e)
            }
        }
    }

    /// Fetch and select a transcript. Same caching rules as documents.
    pub async fn load_transcript(&mut self, media_id: &str) -> Result<String, ExtractionError> {
        let Some(client) = self.transcripts.clone() else {
            return Err(ExtractionError::TranscriptUnavailable {
                media_id: media_id.to_string(),
                reason: "no transcript client configured".into(),
            });
        };

        let (id, result) = self.artifacts.transcript(media_id, client.as_ref()).await;
        match result {
            Ok(text) => {
                info!(artifact = %id, chars = text.chars().count(), "Transcript loaded");
                self.transcript = Some(id.clone());
                Ok(id)
            }
            Err(e) => {
                if self.transcript.as_deref() == Some(id.as_str()) {
                    self.transcript = None;
                }
                Err(e)
            }
        }
    }

    pub fn set_web_search(&mut self, enabled: bool) {
        if enabled && self.search.is_none() {
            warn!("Web search enabled without a search client; turns will fall back to plain input");
        }
        self.web_enabled = enabled;
    }

    pub fn web_search_enabled(&self) -> bool {
        self.web_enabled
    }

    pub fn clear_document(&mut self) {
        self.document = None;
    }

    pub fn clear_transcript(&mut self) {
        self.transcript = None;
    }

    pub fn active_document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    pub fn active_transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    pub fn artifacts(&self) -> &ArtifactCache {
        &self.artifacts
    }

    /// Pick the single source for this turn.
    pub fn select(&self, has_attachment: bool) -> ContextSource {
        if has_attachment {
            return ContextSource::None;
        }
        // The toggle only counts once a search client is configured
        if let (true, Some(client)) = (self.web_enabled, &self.search) {
            return ContextSource::Web {
                client: Some(client.clone()),
                limit: self.search_limit,
            };
        }
        if let Some(id) = &self.document {
            return ContextSource::Document {
                artifact_id: id.clone(),
                text: self.artifacts.text(id),
            };
        }
        if let Some(id) = &self.transcript {
            return ContextSource::Transcript {
                artifact_id: id.clone(),
                text: self.artifacts.text(id),
            };
        }
        ContextSource::None
    }
}
