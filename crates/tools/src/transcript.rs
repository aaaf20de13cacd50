//! Transcript lookup from caption files on disk.
//!
//! A media id `abc123` resolves to `<dir>/abc123.vtt` or `<dir>/abc123.srt`.
//! Cue numbers, timestamps and markup are stripped; the remaining caption
//! lines are joined with spaces, dropping immediate repeats (rolling
//! captions repeat the previous line).

use std::path::PathBuf;

use async_trait::async_trait;
use kaputa_core::error::ExtractionError;
use kaputa_core::retrieval::TranscriptClient;
use tracing::debug;

use crate::markup::strip_tags;

pub struct CaptionFileTranscripts {
    dir: PathBuf,
}

impl CaptionFileTranscripts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn unavailable(media_id: &str, reason: impl Into<String>) -> ExtractionError {
        ExtractionError::TranscriptUnavailable {
            media_id: media_id.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TranscriptClient for CaptionFileTranscripts {
    async fn get_transcript(&self, media_id: &str) -> Result<String, ExtractionError> {
        let valid = !media_id.is_empty()
            && media_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Self::unavailable(media_id, "invalid media id"));
        }

        for ext in ["vtt", "srt"] {
            let path = self.dir.join(format!("{media_id}.{ext}"));
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => {
                    debug!(path = %path.display(), "Loaded caption file");
                    let text = captions_to_text(&raw);
                    if text.is_empty() {
                        return Err(Self::unavailable(media_id, "caption file has no text"));
                    }
                    return Ok(text);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::unavailable(media_id, e.to_string())),
            }
        }

        Err(Self::unavailable(media_id, "no captions found"))
    }
}

/// Flatten WebVTT or SRT captions into running text.
pub fn captions_to_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_note = false;

    for line in raw.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');

        if line.is_empty() {
            in_note = false;
            continue;
        }
        if in_note {
            continue;
        }
        if line.starts_with("WEBVTT") || line.starts_with("NOTE") {
            in_note = line.starts_with("NOTE");
            continue;
        }
        if line.starts_with("STYLE") || line.starts_with("REGION") || line.starts_with("Kind:") {
            continue;
        }
        if line.contains("-->") || line.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let cleaned = strip_tags(line);
        if cleaned.is_empty() {
            continue;
        }
        if lines.last().is_some_and(|prev| *prev == cleaned) {
            continue;
        }
        lines.push(cleaned);
    }

    lines.join(" ")
}
