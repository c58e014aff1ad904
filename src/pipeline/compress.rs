//! Extractive compression and document-level preprocessing.
//!
//! [`compress`] shrinks a fragment to a unit budget by keeping its
//! highest-scoring sentences verbatim, in their original order. It never
//! rewrites or invents text: every sentence in the output is a substring of
//! the input.
//!
//! [`preprocess`] builds a [`DocumentDigest`] (summary, entities, structure,
//! quotes) through the [`TextAnalyzer`] collaborator. The digest is attached
//! to prompts as advisory context only; a fragment's own content is always
//! sent alongside it.

use crate::analysis::{StructureDescriptor, TextAnalyzer};
use crate::document::Document;
use crate::pipeline::cost::{estimate_units, units_for_words};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Score bonus for the first sentence, decaying linearly to zero at the last.
const POSITION_BONUS: f64 = 0.1;

/// Unit budget for the digest summary.
const SUMMARY_UNITS: usize = 120;

/// Number of quotes kept in the digest.
const MAX_QUOTES: usize = 5;

static RE_SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]+["'”’)\]]*\s+|\n\s*\n"#).unwrap());

static RE_TERM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'’-]*").unwrap());

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").unwrap());

static RE_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"\n]+)"|“([^”\n]+)”"#).unwrap());

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "was", "one", "our", "out", "has", "him", "his", "how", "its", "may", "new", "now",
        "see", "two", "who", "did", "get", "let", "she", "too", "use", "that", "with", "have",
        "this", "will", "your", "from", "they", "been", "were", "said", "each", "which",
        "their", "there", "what", "about", "would", "these", "other", "into", "than", "then",
        "them", "some", "could", "also", "only", "very", "when", "where", "while", "just",
        "more", "most", "such", "over", "being", "because", "should", "those", "does",
    ]
    .into_iter()
    .collect()
});

/// Split `text` into trimmed sentence slices.
///
/// A sentence ends at terminal punctuation (plus any closing quotes or
/// brackets) followed by whitespace, or at a blank line.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in RE_SENTENCE_END.find_iter(text) {
        let s = text[start..m.end()].trim();
        if !s.is_empty() {
            sentences.push(s);
        }
        start = m.end();
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Lower-cased terms of `text` that carry meaning (length > 2, not a stopword).
pub fn significant_terms(text: &str) -> Vec<String> {
    RE_TERM
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.chars().count() > 2 && !STOPWORDS.contains(t.as_str()))
        .collect()
}

/// Score each sentence by normalised term frequency plus a positional bonus.
fn score_sentences(sentences: &[&str]) -> Vec<f64> {
    let per_sentence: Vec<Vec<String>> = sentences.iter().map(|s| significant_terms(s)).collect();

    let mut tf: HashMap<&str, usize> = HashMap::new();
    for terms in &per_sentence {
        for t in terms {
            *tf.entry(t.as_str()).or_insert(0) += 1;
        }
    }
    let max_tf = tf.values().copied().max().unwrap_or(1) as f64;
    let n = sentences.len().max(1) as f64;

    per_sentence
        .iter()
        .enumerate()
        .map(|(i, terms)| {
            let content = if terms.is_empty() {
                0.0
            } else {
                terms
                    .iter()
                    .map(|t| tf.get(t.as_str()).copied().unwrap_or(0) as f64 / max_tf)
                    .sum::<f64>()
                    / terms.len() as f64
            };
            content + POSITION_BONUS * (1.0 - i as f64 / n)
        })
        .collect()
}

/// Compress `content` to at most `max_units` estimated units.
///
/// Returns the input unchanged when it already fits. Otherwise sentences are
/// taken greedily by score while they fit, then re-emitted in document order
/// joined by single spaces. When no whole sentence fits, the leading words
/// that do are kept instead. Empty only when not even one word fits.
pub fn compress(content: &str, max_units: usize) -> String {
    if estimate_units(content) <= max_units {
        return content.to_string();
    }

    let sentences = split_sentences(content);
    let scores = score_sentences(&sentences);

    let mut order: Vec<usize> = (0..sentences.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    let mut used = 0usize;
    let mut selected = Vec::new();
    for i in order {
        let units = estimate_units(sentences[i]);
        if units == 0 || used + units > max_units {
            continue;
        }
        used += units;
        selected.push(i);
    }
    if selected.is_empty() {
        return truncate_words(content, max_units);
    }
    selected.sort_unstable();

    debug!(
        "Compressed {} sentences to {} ({} / {} units)",
        sentences.len(),
        selected.len(),
        used,
        max_units
    );

    selected
        .into_iter()
        .map(|i| sentences[i])
        .collect::<Vec<_>>()
        .join(" ")
}

/// The longest prefix of whole words of `content` within `max_units`.
fn truncate_words(content: &str, max_units: usize) -> String {
    let mut end = 0;
    for (words, m) in RE_WORD.find_iter(content).enumerate() {
        if units_for_words(words + 1) > max_units {
            break;
        }
        end = m.end();
    }
    debug!("No sentence fits {} units; truncated to {} bytes", max_units, end);
    content[..end].trim().to_string()
}

/// Pull quoted passages of at least four words, in order of appearance.
pub fn extract_quotes(text: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    RE_QUOTE
        .captures_iter(text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|q| q.split_whitespace().count() >= 4)
        .filter(|q| seen.insert(q.clone()))
        .take(limit)
        .collect()
}

// ── Document preprocessing ───────────────────────────────────────────────

/// Document-level context attached to every prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentDigest {
    pub summary: String,
    pub key_entities: Vec<String>,
    pub structure: StructureDescriptor,
    pub key_quotes: Vec<String>,
}

impl DocumentDigest {
    /// Render the digest as a prompt context block.
    pub fn as_context(&self) -> String {
        let mut out = String::new();
        if !self.summary.is_empty() {
            out.push_str("Document summary: ");
            out.push_str(&self.summary);
            out.push('\n');
        }
        if !self.key_entities.is_empty() {
            out.push_str("Key entities: ");
            out.push_str(&self.key_entities.join(", "));
            out.push('\n');
        }
        if !self.structure.headings.is_empty() {
            out.push_str("Sections: ");
            out.push_str(&self.structure.headings.join(" / "));
            out.push('\n');
        }
        if self.structure.has_dialogue {
            out.push_str("The document contains dialogue.\n");
        }
        if !self.key_quotes.is_empty() {
            out.push_str("Notable quotes:\n");
            for q in &self.key_quotes {
                out.push_str(&format!("- \"{q}\"\n"));
            }
        }
        out
    }
}

/// Build the [`DocumentDigest`] for `document`.
///
/// Analyzer failures degrade to an extractive summary and empty entity list
/// rather than failing the document.
pub async fn preprocess(document: &Document, analyzer: &dyn TextAnalyzer) -> DocumentDigest {
    let text = document.content();

    let summary = match analyzer.summarize(text).await {
        Ok(s) => s,
        Err(e) => {
            warn!("Summarize failed for '{}': {e}; using extractive summary", document.title());
            compress(text, SUMMARY_UNITS)
        }
    };

    let key_entities = analyzer.extract_entities(text).await.unwrap_or_else(|e| {
        warn!("Entity extraction failed for '{}': {e}", document.title());
        Vec::new()
    });

    let structure = match analyzer.analyze_structure(text).await {
        Ok(s) => s,
        Err(e) => {
            warn!("Structure analysis failed for '{}': {e}", document.title());
            StructureDescriptor::default()
        }
    };

    DocumentDigest {
        summary,
        key_entities,
        structure,
        key_quotes: extract_quotes(text, MAX_QUOTES),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Rust ownership prevents data races. \
        The borrow checker enforces ownership rules at compile time. \
        Lunch was pleasant. \
        Ownership and borrowing make Rust memory safe without a garbage collector. \
        The weather turned cold in the afternoon.";

    #[test]
    fn splits_on_terminal_punctuation_and_blank_lines() {
        let s = split_sentences("One. Two!  Three?\n\nFour without stop\nstill four");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four without stop\nstill four"]);
    }

    #[test]
    fn keeps_closing_quotes_with_sentence() {
        let s = split_sentences("She said \"stop.\" Then left.");
        assert_eq!(s, vec!["She said \"stop.\"", "Then left."]);
    }

    #[test]
    fn significant_terms_drop_stopwords() {
        let t = significant_terms("The cat and the Hat sat on a mat");
        assert_eq!(t, vec!["cat", "hat", "sat", "mat"]);
    }

    #[test]
    fn compress_returns_input_when_it_fits() {
        assert_eq!(compress("short text.", 100), "short text.");
    }

    #[test]
    fn compress_stays_within_budget() {
        for budget in [5, 12, 20, 30] {
            let out = compress(TEXT, budget);
            assert!(
                estimate_units(&out) <= budget,
                "budget {budget}: got {} units",
                estimate_units(&out)
            );
        }
    }

    #[test]
    fn compress_is_extractive_and_ordered() {
        let out = compress(TEXT, 30);
        let originals = split_sentences(TEXT);
        let kept = split_sentences(&out);
        assert!(!kept.is_empty());
        let mut last = 0;
        for s in kept {
            let pos = originals
                .iter()
                .position(|o| *o == s)
                .unwrap_or_else(|| panic!("fabricated sentence: {s}"));
            assert!(pos >= last, "order scrambled");
            last = pos;
        }
    }

    #[test]
    fn compress_prefers_topical_sentences() {
        let out = compress(TEXT, 20);
        assert!(out.contains("ownership") || out.contains("Ownership"));
        assert!(!out.contains("Lunch was pleasant"));
    }

    #[test]
    fn unpunctuated_text_falls_back_to_leading_words() {
        let text = (0..60).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let out = compress(&text, 50);
        assert!(!out.is_empty());
        assert!(estimate_units(&out) <= 50);
        assert!(text.starts_with(&out));
        assert!(out.ends_with("word37"));

        let out = compress("A very long single sentence that cannot possibly fit here.", 3);
        assert_eq!(out, "A very");
        assert!(compress("Two words.", 1).is_empty());
    }

    #[test]
    fn quotes_need_four_words() {
        let q = extract_quotes(
            r#"He said "go now" and then "we will meet again tomorrow" and “we will meet again tomorrow”."#,
            5,
        );
        assert_eq!(q, vec!["we will meet again tomorrow"]);
    }

    #[test]
    fn digest_context_lists_sections() {
        let d = DocumentDigest {
            summary: "About Rust.".into(),
            key_entities: vec!["Rust".into(), "Cargo".into()],
            structure: StructureDescriptor {
                headings: vec!["Ownership".into(), "Borrowing".into()],
                has_dialogue: true,
                ..StructureDescriptor::default()
            },
            key_quotes: vec!["fearless concurrency for everyone".into()],
        };
        let ctx = d.as_context();
        assert!(ctx.contains("Document summary: About Rust."));
        assert!(ctx.contains("Key entities: Rust, Cargo"));
        assert!(ctx.contains("Sections: Ownership / Borrowing"));
        assert!(ctx.contains("contains dialogue"));
        assert!(ctx.contains("- \"fearless concurrency for everyone\""));
        assert!(DocumentDigest::default().as_context().is_empty());
    }
}
