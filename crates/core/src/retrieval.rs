//! Retrieval collaborators — where supplementary turn context comes from.
//!
//! Document extraction, web search and transcript fetching are external
//! services. The chat core only consumes these contracts; concrete adapters
//! live in `kaputa-tools`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ExtractionError, SearchError};

/// An uploaded file, as received from the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Original file name (used for type detection and messages)
    pub name: String,

    /// MIME type reported by the uploader, if any
    pub mime_type: Option<String>,

    /// Raw file contents
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            bytes,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Lower-cased file extension, if present.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Turns an uploaded document into plain text.
///
/// Callers cache the result per artifact; an extractor is expected to run at
/// most once per upload.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_text(&self, upload: &Upload) -> Result<String, ExtractionError>;
}

/// One web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Best-effort web search.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Return at most `limit` results for `query`, best match first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// Fetches caption text for a media item (e.g. a video id).
#[async_trait]
pub trait TranscriptClient: Send + Sync {
    async fn get_transcript(&self, media_id: &str) -> Result<String, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_extension_is_lowercased() {
        let upload = Upload::new("Report.PDF", vec![]);
        assert_eq!(upload.extension().as_deref(), Some("pdf"));
        assert_eq!(Upload::new("README", vec![]).extension(), None);
    }

    #[test]
    fn search_hit_without_url_serializes_compactly() {
        let hit = SearchHit {
            title: "Photosynthesis".into(),
            snippet: "Plants convert light".into(),
            url: None,
        };
        let json = serde_json::to_string(&hit).unwrap();
        assert!(!json.contains("url"));
    }
}
