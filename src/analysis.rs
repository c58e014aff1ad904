//! Text-analysis collaborator: summaries, entities and structure.
//!
//! The pipeline only depends on the [`TextAnalyzer`] trait. Callers with a
//! real NLP toolkit plug it in via
//! [`crate::coordinator::Pipeline::with_analyzer`]; otherwise the built-in
//! [`HeuristicAnalyzer`] is used. It is purely extractive and needs no
//! network access.

use crate::pipeline::chunk::{has_dialogue_markers, section_marker};
use crate::pipeline::compress::{compress, significant_terms, split_sentences};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Failure reported by a [`TextAnalyzer`].
#[derive(Debug, Clone, Error)]
#[error("text analysis failed: {0}")]
pub struct AnalysisError(pub String);

/// Coarse shape of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDescriptor {
    pub paragraphs: usize,
    pub sentences: usize,
    /// Titles of detected section markers, in order.
    pub headings: Vec<String>,
    pub has_dialogue: bool,
}

/// Stable interface to a text-analysis toolkit.
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, AnalysisError>;

    async fn extract_entities(&self, text: &str) -> Result<Vec<String>, AnalysisError>;

    async fn analyze_structure(&self, text: &str) -> Result<StructureDescriptor, AnalysisError>;
}

/// Extractive, dependency-free [`TextAnalyzer`].
#[derive(Debug, Clone)]
pub struct HeuristicAnalyzer {
    /// Unit budget for [`TextAnalyzer::summarize`].
    pub summary_units: usize,
    /// Maximum entities returned.
    pub max_entities: usize,
}

impl Default for HeuristicAnalyzer {
    fn default() -> Self {
        Self {
            summary_units: 120,
            max_entities: 10,
        }
    }
}

static RE_CAPITALISED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\p{Lu}[\p{L}'’-]+(?:[ \t]+\p{Lu}[\p{L}'’-]+)*").unwrap());

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

#[async_trait]
impl TextAnalyzer for HeuristicAnalyzer {
    async fn summarize(&self, text: &str) -> Result<String, AnalysisError> {
        Ok(compress(text, self.summary_units))
    }

    /// Capitalised phrases, ranked by frequency then first appearance.
    ///
    /// Single words must appear at least twice and carry meaning, which
    /// filters out ordinary sentence-initial capitals.
    async fn extract_entities(&self, text: &str) -> Result<Vec<String>, AnalysisError> {
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (order, m) in RE_CAPITALISED.find_iter(text).enumerate() {
            let phrase = strip_leading_stopword(m.as_str());
            if !phrase.is_empty() {
                counts.entry(phrase).or_insert((0, order)).0 += 1;
            }
        }

        let mut ranked: Vec<(&str, usize, usize)> = counts
            .into_iter()
            .filter(|(phrase, (count, _))| {
                let multiword = phrase.split_whitespace().count() > 1;
                (multiword || *count >= 2) && !significant_terms(phrase).is_empty()
            })
            .map(|(phrase, (count, first))| (phrase, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        Ok(ranked
            .into_iter()
            .take(self.max_entities)
            .map(|(p, _, _)| p.to_string())
            .collect())
    }

    async fn analyze_structure(&self, text: &str) -> Result<StructureDescriptor, AnalysisError> {
        let paragraphs = RE_PARAGRAPH_BREAK
            .split(text)
            .filter(|p| !p.trim().is_empty())
            .count();
        let headings = text
            .lines()
            .filter_map(section_marker)
            .map(|m| m.title)
            .collect();
        Ok(StructureDescriptor {
            paragraphs,
            sentences: split_sentences(text).len(),
            headings,
            has_dialogue: has_dialogue_markers(text),
        })
    }
}

/// "The Analytical Engine" → "Analytical Engine"; "The" → "".
fn strip_leading_stopword(phrase: &str) -> &str {
    match phrase.split_once(char::is_whitespace) {
        Some((first, rest)) if significant_terms(first).is_empty() => rest.trim_start(),
        None if significant_terms(phrase).is_empty() => "",
        _ => phrase,
    }
}
