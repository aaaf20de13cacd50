//! Plain-text document extraction.
//!
//! Handles text-like uploads (`.txt`, `.md`, `.csv`, `.json`, `.log`, ...).
//! Binary formats such as PDF are rejected as unsupported instead of being
//! fed to the model as garbage.

use async_trait::async_trait;
use kaputa_core::error::ExtractionError;
use kaputa_core::retrieval::{DocumentExtractor, Upload};
use tracing::debug;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "tsv", "json", "log", "text"];

/// Default upper bound on extracted characters.
pub const DEFAULT_MAX_CHARS: usize = 200_000;

pub struct TextDocumentExtractor {
    max_chars: usize,
}

impl TextDocumentExtractor {
    pub fn new() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    fn accepts(upload: &Upload) -> bool {
        if let Some(mime) = upload.mime_type.as_deref() {
            if mime.starts_with("text/") || mime == "application/json" {
                return true;
            }
        }
        upload
            .extension()
            .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
    }
}

impl Default for TextDocumentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentExtractor for TextDocumentExtractor {
    async fn extract_text(&self, upload: &Upload) -> Result<String, ExtractionError> {
        if !Self::accepts(upload) {
            let kind = upload
                .extension()
                .or_else(|| upload.mime_type.clone())
                .unwrap_or_else(|| "unknown".into());
            return Err(ExtractionError::Unsupported(format!(
                "{} ({kind})",
                upload.name
            )));
        }

        let text =
            std::str::from_utf8(&upload.bytes).map_err(|e| ExtractionError::Unreadable {
                name: upload.name.clone(),
                reason: format!("not valid UTF-8: {e}"),
            })?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        if text.trim().is_empty() {
            return Err(ExtractionError::Empty(upload.name.clone()));
        }

        let text: String = if text.chars().count() > self.max_chars {
            debug!(name = %upload.name, max = self.max_chars, "Truncating document text");
            text.chars().take(self.max_chars).collect()
        } else {
            text.to_string()
        };

        Ok(text)
    }
}
