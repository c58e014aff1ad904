//! Documents, fragments and the target formats they are repurposed into.
//!
//! A [`Document`] is immutable once constructed: its word count is computed
//! exactly once, and its lifecycle status is tracked by the
//! [`crate::coordinator::Pipeline`] rather than stored on the value itself.
//! A [`Fragment`] is a contiguous byte range of a document's content and is
//! never mutated either; compressing it for a prompt produces a new string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Descriptive metadata recorded at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    /// ISO-639-1 code of the source language, if known (e.g. "en").
    pub source_language: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

/// A long-form text document to repurpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    id: Uuid,
    content: String,
    metadata: DocumentMetadata,
    word_count: usize,
}

impl Document {
    /// Create a document stamped with the current time and a fresh id.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let word_count = content.split_whitespace().count();
        Self {
            id: Uuid::new_v4(),
            content,
            metadata: DocumentMetadata {
                title: title.into(),
                source_language: None,
                ingested_at: Utc::now(),
            },
            word_count,
        }
    }

    /// Record the document's source language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.metadata.source_language = Some(language.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    /// Whitespace-delimited word count, computed once at construction.
    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Lifecycle of a document inside the pipeline.
///
/// `Pending → Processing → {Completed | Partial | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    /// Every fragment succeeded or was served from cache.
    Completed,
    /// At least one fragment failed or was left unplanned, but output exists.
    Partial,
    /// An unrecoverable error occurred before or during assembly.
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Partial | DocumentStatus::Failed
        )
    }
}

/// The derivative a document is turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFormat {
    /// Audio-episode scripts, bounded by speaking time.
    Podcast,
    /// Structured course modules following the document's sections.
    Course,
    /// Short-form video scripts, one fragment per narrative beat.
    ShortVideo,
    /// Translation into `ProcessingOptions::target_language`.
    Translation,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 4] = [
        TargetFormat::Podcast,
        TargetFormat::Course,
        TargetFormat::ShortVideo,
        TargetFormat::Translation,
    ];

    /// Stable label used in fingerprints, prompts and the CLI.
    pub fn label(&self) -> &'static str {
        match self {
            TargetFormat::Podcast => "podcast",
            TargetFormat::Course => "course",
            TargetFormat::ShortVideo => "short_video",
            TargetFormat::Translation => "translation",
        }
    }

    /// Expected output length relative to input, used for cost estimates.
    pub fn output_ratio(&self) -> f64 {
        match self {
            TargetFormat::Podcast => 1.2,
            TargetFormat::Course => 1.0,
            TargetFormat::ShortVideo => 0.4,
            TargetFormat::Translation => 1.1,
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "podcast" | "audio" => Ok(TargetFormat::Podcast),
            "course" => Ok(TargetFormat::Course),
            "short_video" | "video" | "shorts" => Ok(TargetFormat::ShortVideo),
            "translation" | "translate" => Ok(TargetFormat::Translation),
            other => Err(format!(
                "unknown format '{other}' (expected podcast, course, short-video or translation)"
            )),
        }
    }
}

/// Structural role of a fragment inside its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentTag {
    /// A titled section of a structured document.
    Section,
    /// Conversational text: speaker lines or dense quotation.
    Dialogue,
    /// Plain prose.
    Narration,
    /// An exercise, quiz or practice block.
    Exercise,
}

impl FragmentTag {
    pub fn label(&self) -> &'static str {
        match self {
            FragmentTag::Section => "section",
            FragmentTag::Dialogue => "dialogue",
            FragmentTag::Narration => "narration",
            FragmentTag::Exercise => "exercise",
        }
    }
}

impl fmt::Display for FragmentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of a fragment: start offset plus a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId {
    pub start: usize,
    /// Hex SHA-256 of the fragment content.
    pub hash: String,
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.hash.get(..8).unwrap_or(&self.hash);
        write!(f, "frag-{}-{}", self.start, short)
    }
}

/// A contiguous sub-range of a document, dispatched as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    /// Position in the document's fragment sequence (0-based).
    pub index: usize,
    /// Byte offset of the first character in the document content.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    pub content: String,
    pub tag: FragmentTag,
}

impl Fragment {
    pub fn new(index: usize, start: usize, content: impl Into<String>, tag: FragmentTag) -> Self {
        let content = content.into();
        let hash = hex::encode(Sha256::digest(content.as_bytes()));
        Self {
            id: FragmentId { start, hash },
            index,
            start,
            end: start + content.len(),
            content,
            tag,
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_is_computed_once() {
        let doc = Document::new("T", "one two  three\nfour");
        assert_eq!(doc.word_count(), 4);
        assert_eq!(doc.title(), "T");
        assert!(doc.metadata().source_language.is_none());
        assert_eq!(
            doc.with_language("en").metadata().source_language.as_deref(),
            Some("en")
        );
    }

    #[test]
    fn blank_document_detected() {
        assert!(Document::new("t", "  \n\t ").is_blank());
        assert!(!Document::new("t", "x").is_blank());
    }

    #[test]
    fn fragment_identity_depends_on_offset_and_content() {
        let a = Fragment::new(0, 0, "hello world", FragmentTag::Narration);
        let b = Fragment::new(0, 10, "hello world", FragmentTag::Narration);
        let c = Fragment::new(0, 0, "hello there", FragmentTag::Narration);
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.hash, b.id.hash);
        assert_eq!(a.end, 11);
    }

    #[test]
    fn fragment_id_display_is_short() {
        let f = Fragment::new(0, 42, "abc", FragmentTag::Section);
        let s = f.id.to_string();
        assert!(s.starts_with("frag-42-"));
        assert_eq!(s.len(), "frag-42-".len() + 8);
    }

    #[test]
    fn format_parses_cli_spellings() {
        assert_eq!("short-video".parse::<TargetFormat>(), Ok(TargetFormat::ShortVideo));
        assert_eq!("Podcast".parse::<TargetFormat>(), Ok(TargetFormat::Podcast));
        assert_eq!("translate".parse::<TargetFormat>(), Ok(TargetFormat::Translation));
        assert!("blog".parse::<TargetFormat>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!DocumentStatus::Pending.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(DocumentStatus::Partial.is_terminal());
    }
}
