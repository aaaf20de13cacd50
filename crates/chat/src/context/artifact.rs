//! Per-artifact cache of extracted text.
//!
//! Documents are keyed by the SHA-256 digest of their bytes, transcripts by
//! media id. Each key is extracted at most once; failures are remembered too,
//! so a broken upload never triggers a second extraction attempt.

use std::collections::HashMap;
use std::sync::Arc;

use kaputa_core::error::ExtractionError;
use kaputa_core::retrieval::{DocumentExtractor, TranscriptClient, Upload};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum Entry {
    Ready(Arc<str>),
    Failed(ExtractionError),
}

/// Cache of extraction results, one entry per uploaded artifact.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: HashMap<String, Entry>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable id for an uploaded document.
    pub fn document_id(upload: &Upload) -> String {
        format!("doc:{}", hex::encode(Sha256::digest(&upload.bytes)))
    }

    /// Stable id for a transcript.
    pub fn transcript_id(media_id: &str) -> String {
        format!("transcript:{media_id}")
    }

    /// Extract the upload's text, or return the cached result.
    pub async fn document(
        &mut self,
        upload: &Upload,
        extractor: &dyn DocumentExtractor,
    ) -> (String, Result<Arc<str>, ExtractionError>) {
        let id = Self::document_id(upload);
        if let Some(cached) = self.lookup(&id) {
            return (id, cached);
        }

        debug!(artifact = %id, name = %upload.name, "Extracting document text");
        let result = extractor.extract_text(upload).await;
        let result = self.record(&id, result);
        (id, result)
    }

    /// Fetch the transcript for `media_id`, or return the cached result.
    pub async fn transcript(
        &mut self,
        media_id: &str,
        client: &dyn TranscriptClient,
    ) -> (String, Result<Arc<str>, ExtractionError>) {
        let id = Self::transcript_id(media_id);
        if let Some(cached) = self.lookup(&id) {
            return (id, cached);
        }

        debug!(artifact = %id, "Fetching transcript");
        let result = client.get_transcript(media_id).await;
        let result = self.record(&id, result);
        (id, result)
    }

    /// Cached text for a successfully extracted artifact.
    ///
    /// Failed and unknown artifacts are both absent.
    pub fn text(&self, id: &str) -> Option<Arc<str>> {
        match self.entries.get(id) {
            Some(Entry::Ready(text)) => Some(text.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, id: &str) -> Option<Result<Arc<str>, ExtractionError>> {
        self.entries.get(id).map(|entry| match entry {
            Entry::Ready(text) => Ok(text.clone()),
            Entry::Failed(e) => Err(e.clone()),
        })
    }

    fn record(
        &mut self,
        id: &str,
        result: Result<String, ExtractionError>,
    ) -> Result<Arc<str>, ExtractionError> {
        match result {
            Ok(text) => {
                let text: Arc<str> = Arc::from(text);
                self.entries
                    .insert(id.to_string(), Entry::Ready(text.clone()));
                Ok(text)
            }
            Err(e) => {
                warn!(artifact = %id, error = %e, "Extraction failed");
                self.entries.insert(id.to_string(), Entry::Failed(e.clone()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Extractor that counts calls and returns fixed text (or fails).
    pub(crate) struct CountingExtractor {
        pub calls: AtomicUsize,
        pub text: Option<String>,
    }

    impl CountingExtractor {
        pub(crate) fn returning(text: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                text: Some(text.into()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                text: None,
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentExtractor for CountingExtractor {
        async fn extract_text(&self, upload: &Upload) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.text.clone().ok_or_else(|| ExtractionError::Unreadable {
                name: upload.name.clone(),
                reason: "corrupt".into(),
            })
        }
    }

    #[tokio::test]
    async fn same_bytes_extract_once() {
        let extractor = CountingExtractor::returning("leaf text");
        let mut cache = ArtifactCache::new();
        let upload = Upload::new("leaf.txt", b"leaf".to_vec());

        let (id1, first) = cache.document(&upload, &extractor).await;
        let renamed = Upload::new("copy-of-leaf.txt", b"leaf".to_vec());
        let (id2, second) = cache.document(&renamed, &extractor).await;

        assert_eq!(id1, id2);
        assert_eq!(&*first.unwrap(), "leaf text");
        assert_eq!(&*second.unwrap(), "leaf text");
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn failure_is_remembered() {
        let extractor = CountingExtractor::failing();
        let mut cache = ArtifactCache::new();
        let upload = Upload::new("broken.txt", b"\x00".to_vec());

        let (id, first) = cache.document(&upload, &extractor).await;
        let (_, second) = cache.document(&upload, &extractor).await;

        assert!(first.is_err());
        assert!(second.is_err());
        assert_eq!(extractor.calls(), 1);
        assert!(cache.contains(&id));
        assert!(cache.text(&id).is_none());
    }

    #[test]
    fn document_id_is_sha256_hex() {
        let id = ArtifactCache::document_id(&Upload::new("a", b"abc".to_vec()));
        assert_eq!(
            id,
            "doc:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn unknown_artifact_is_absent() {
        let cache = ArtifactCache::new();
        assert!(cache.text("doc:nope").is_none());
        assert!(cache.is_empty());
    }
}
