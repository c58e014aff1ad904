//! Chunk planner: format-aware segmentation of a document into fragments.
//!
//! Each target format draws fragment boundaries differently:
//!
//! | Format | Boundary policy | Context group |
//! |--------|-----------------|---------------|
//! | Podcast | grow by paragraph up to the segment speaking-time ceiling | episode |
//! | Translation | grow by paragraph up to the unit ceiling | whole text |
//! | Course | explicit section markers, paragraph fallback | module |
//! | Short video | one narrative beat per fragment | scene |
//!
//! The [`ContextMap`] produced alongside the fragments is consumed only by
//! assembly; dispatch never looks at it. A document without any detectable
//! boundary degrades to a single fragment.

use crate::config::SegmentOptions;
use crate::document::{Document, Fragment, FragmentTag, TargetFormat};
use crate::pipeline::compress::split_sentences;
use crate::pipeline::cost::UNITS_PER_WORD;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

static RE_MD_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").unwrap());

static RE_CHAPTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(chapter|module|part|unit|lesson)\s+([0-9]+|[ivxlc]+)\b").unwrap()
});

static RE_EXERCISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(exercises?|quiz|practice|assignment|review questions)\b").unwrap()
});

static RE_SPEAKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\p{Lu}[\p{L} .'’-]{0,30}:\s+\S").unwrap());

static RE_QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""[^"\n]*"|“[^”\n]*”"#).unwrap());

// ── Boundary detection ───────────────────────────────────────────────────

/// A line that opens a new section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMarker {
    /// 1 = top level (module/chapter), larger = deeper.
    pub level: usize,
    pub title: String,
}

/// Recognise Markdown headings and "Chapter 3" / "Module II" / "Lesson 4" lines.
pub fn section_marker(line: &str) -> Option<SectionMarker> {
    let line = line.trim_end();
    if let Some(caps) = RE_MD_HEADING.captures(line) {
        return Some(SectionMarker {
            level: caps[1].len(),
            title: caps[2].to_string(),
        });
    }
    let trimmed = line.trim();
    RE_CHAPTER.captures(trimmed).map(|caps| SectionMarker {
        level: if caps[1].eq_ignore_ascii_case("lesson") { 2 } else { 1 },
        title: trimmed.to_string(),
    })
}

/// Speaker lines (`HOST: …`), quote-led lines, or dense quotation.
pub fn has_dialogue_markers(text: &str) -> bool {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return false;
    }
    let dialogue_lines = lines
        .iter()
        .filter(|l| {
            RE_SPEAKER.is_match(l)
                || l.starts_with('"')
                || l.starts_with('“')
                || l.starts_with('—')
        })
        .count();
    if dialogue_lines >= 2 {
        return true;
    }
    let quoted: usize = RE_QUOTED.find_iter(text).map(|m| m.as_str().len()).sum();
    quoted * 5 > text.trim().len() * 2
}

fn prose_tag(content: &str) -> FragmentTag {
    if has_dialogue_markers(content) {
        FragmentTag::Dialogue
    } else {
        FragmentTag::Narration
    }
}

// ── Context map ──────────────────────────────────────────────────────────

/// The structural group a fragment belongs to in the assembled output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextGroup {
    /// Podcast episode (1-based).
    Episode(usize),
    /// Course module (1-based; 0 for a preamble before the first marker).
    Module { index: usize, name: String },
    /// Short-video scene (1-based).
    Scene(usize),
    /// The whole translated text.
    Part,
}

impl ContextGroup {
    pub fn label(&self) -> String {
        match self {
            ContextGroup::Episode(n) => format!("Episode {n}"),
            ContextGroup::Module { name, .. } => name.clone(),
            ContextGroup::Scene(n) => format!("Scene {n}"),
            ContextGroup::Part => "Full text".to_string(),
        }
    }
}

/// Fragment index → structural group, aligned with the fragment list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMap {
    groups: Vec<ContextGroup>,
}

impl ContextMap {
    pub fn group(&self, fragment_index: usize) -> Option<&ContextGroup> {
        self.groups.get(fragment_index)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of distinct consecutive groups.
    pub fn group_count(&self) -> usize {
        let mut n = 0;
        let mut prev: Option<&ContextGroup> = None;
        for g in &self.groups {
            if prev != Some(g) {
                n += 1;
            }
            prev = Some(g);
        }
        n
    }

    fn push(&mut self, group: ContextGroup) {
        self.groups.push(group);
    }
}

/// Output of [`segment`].
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub fragments: Vec<Fragment>,
    pub context_map: ContextMap,
}

// ── Spans ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn words(&self, text: &str) -> usize {
        text[self.start..self.end].split_whitespace().count()
    }
}

/// Trimmed, non-empty paragraph spans of `text[range]`, as absolute offsets.
fn paragraphs_in(text: &str, from: usize, to: usize) -> Vec<Span> {
    let slice = &text[from..to];
    let mut spans = Vec::new();
    let mut seg_start = 0;
    let push = |s: usize, e: usize, spans: &mut Vec<Span>| {
        let seg = &slice[s..e];
        let lead = seg.len() - seg.trim_start().len();
        let trail = seg.len() - seg.trim_end().len();
        if lead + trail < seg.len() {
            spans.push(Span {
                start: from + s + lead,
                end: from + e - trail,
            });
        }
    };
    for m in RE_PARAGRAPH_BREAK.find_iter(slice) {
        push(seg_start, m.start(), &mut spans);
        seg_start = m.end();
    }
    push(seg_start, slice.len(), &mut spans);
    spans
}

/// Merge consecutive spans while the total word count stays within `ceiling`.
/// A single span over the ceiling is kept whole.
fn grow_by_ceiling(text: &str, spans: &[Span], ceiling_words: usize) -> Vec<Span> {
    let mut out = Vec::new();
    let mut current: Option<(Span, usize)> = None;
    for span in spans {
        let words = span.words(text);
        current = match current {
            Some((acc, acc_words)) if acc_words + words <= ceiling_words => Some((
                Span {
                    start: acc.start,
                    end: span.end,
                },
                acc_words + words,
            )),
            Some((acc, _)) => {
                out.push(acc);
                Some((*span, words))
            }
            None => Some((*span, words)),
        };
    }
    if let Some((acc, _)) = current {
        out.push(acc);
    }
    out
}

/// Split a paragraph into sentence runs of at most `ceiling` words.
fn sentence_runs(text: &str, span: Span, ceiling: usize) -> Vec<Span> {
    let base = text.as_ptr() as usize;
    let sentences: Vec<Span> = split_sentences(&text[span.start..span.end])
        .into_iter()
        .map(|s| {
            let start = s.as_ptr() as usize - base;
            Span {
                start,
                end: start + s.len(),
            }
        })
        .collect();
    grow_by_ceiling(text, &sentences, ceiling)
}

fn units_to_words(units: usize) -> usize {
    ((units as f64 / UNITS_PER_WORD).floor() as usize).max(1)
}

// ── Segmentation ─────────────────────────────────────────────────────────

/// Segment `document` into fragments for `format`.
pub fn segment(document: &Document, format: TargetFormat, options: &SegmentOptions) -> Segmentation {
    let text = document.content();
    let segmentation = match format {
        TargetFormat::Podcast => segment_podcast(text, options),
        TargetFormat::Translation => segment_translation(text, options),
        TargetFormat::Course => segment_course(text, options),
        TargetFormat::ShortVideo => segment_short_video(text, options),
    };
    debug!(
        "Segmented '{}' for {}: {} fragments in {} groups",
        document.title(),
        format,
        segmentation.fragments.len(),
        segmentation.context_map.group_count()
    );
    segmentation
}

fn build(text: &str, pieces: Vec<(Span, FragmentTag, ContextGroup)>) -> Segmentation {
    let mut fragments = Vec::with_capacity(pieces.len());
    let mut context_map = ContextMap::default();
    for (index, (span, tag, group)) in pieces.into_iter().enumerate() {
        fragments.push(Fragment::new(index, span.start, &text[span.start..span.end], tag));
        context_map.push(group);
    }
    Segmentation {
        fragments,
        context_map,
    }
}

fn segment_podcast(text: &str, options: &SegmentOptions) -> Segmentation {
    let wpm = options.words_per_minute.max(1) as f64;
    let ceiling = ((options.segment_minutes * wpm) as usize).max(1);
    let spans = grow_by_ceiling(text, &paragraphs_in(text, 0, text.len()), ceiling);

    let mut episode = 1;
    let mut minutes = 0.0;
    let mut pieces = Vec::with_capacity(spans.len());
    for span in spans {
        let m = span.words(text) as f64 / wpm;
        if minutes > 0.0 && minutes + m > options.episode_minutes {
            episode += 1;
            minutes = 0.0;
        }
        minutes += m;
        let tag = prose_tag(&text[span.start..span.end]);
        pieces.push((span, tag, ContextGroup::Episode(episode)));
    }
    build(text, pieces)
}

fn segment_translation(text: &str, options: &SegmentOptions) -> Segmentation {
    let ceiling = units_to_words(options.max_fragment_units);
    let pieces = grow_by_ceiling(text, &paragraphs_in(text, 0, text.len()), ceiling)
        .into_iter()
        .map(|span| (span, prose_tag(&text[span.start..span.end]), ContextGroup::Part))
        .collect();
    build(text, pieces)
}

fn segment_course(text: &str, options: &SegmentOptions) -> Segmentation {
    // (line start offset, marker)
    let mut markers: Vec<(usize, SectionMarker)> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(marker) = section_marker(line) {
            markers.push((offset, marker));
        }
        offset += line.len();
    }

    let ceiling = units_to_words(options.max_fragment_units);

    if markers.is_empty() {
        let per_module = options.sections_per_module.max(1);
        let pieces = grow_by_ceiling(text, &paragraphs_in(text, 0, text.len()), ceiling)
            .into_iter()
            .enumerate()
            .map(|(i, span)| {
                let content = &text[span.start..span.end];
                let tag = if RE_EXERCISE.is_match(content) {
                    FragmentTag::Exercise
                } else if has_dialogue_markers(content) {
                    FragmentTag::Dialogue
                } else {
                    FragmentTag::Section
                };
                let index = i / per_module + 1;
                let group = ContextGroup::Module {
                    index,
                    name: format!("Module {index}"),
                };
                (span, tag, group)
            })
            .collect();
        return build(text, pieces);
    }

    let module_level = markers.iter().map(|(_, m)| m.level).min().unwrap_or(1);

    // Raw sections: preamble (if any) then one per marker.
    let mut sections: Vec<(usize, usize, Option<SectionMarker>)> = Vec::new();
    if !text[..markers[0].0].trim().is_empty() {
        sections.push((0, markers[0].0, None));
    }
    for (i, (start, marker)) in markers.iter().enumerate() {
        let end = markers.get(i + 1).map_or(text.len(), |(s, _)| *s);
        sections.push((*start, end, Some(marker.clone())));
    }

    let mut module_index = 0;
    let mut module_name = "Introduction".to_string();
    let mut pending_start: Option<usize> = None;
    let mut pieces = Vec::new();
    let last = sections.len() - 1;

    for (i, (start, end, marker)) in sections.into_iter().enumerate() {
        if let Some(m) = &marker {
            if m.level == module_level {
                module_index += 1;
                module_name = m.title.clone();
            }
        }
        let body_blank = match &marker {
            Some(_) => text[start..end]
                .split_once('\n')
                .is_none_or(|(_, body)| body.trim().is_empty()),
            None => false,
        };
        if body_blank && i < last {
            // A bare heading is folded into the next section.
            pending_start.get_or_insert(start);
            continue;
        }
        let from = pending_start.take().unwrap_or(start);
        let exercise = marker
            .as_ref()
            .is_some_and(|m| RE_EXERCISE.is_match(&m.title));
        let group = ContextGroup::Module {
            index: module_index,
            name: module_name.clone(),
        };
        for span in grow_by_ceiling(text, &paragraphs_in(text, from, end), ceiling) {
            let content = &text[span.start..span.end];
            let tag = if exercise {
                FragmentTag::Exercise
            } else if has_dialogue_markers(content) {
                FragmentTag::Dialogue
            } else {
                FragmentTag::Section
            };
            pieces.push((span, tag, group.clone()));
        }
    }
    build(text, pieces)
}

fn segment_short_video(text: &str, options: &SegmentOptions) -> Segmentation {
    let max_words = options.beat_max_words.max(1);
    let mut beats: Vec<Span> = Vec::new();
    for para in paragraphs_in(text, 0, text.len()) {
        if para.words(text) > max_words {
            beats.extend(sentence_runs(text, para, max_words));
        } else {
            beats.push(para);
        }
    }

    // Fold beats that are too short to stand alone into their successor,
    // or into the predecessor for a trailing one.
    let mut merged: Vec<Span> = Vec::with_capacity(beats.len());
    let mut carry: Option<usize> = None;
    for beat in beats {
        let start = carry.take().unwrap_or(beat.start);
        let span = Span {
            start,
            end: beat.end,
        };
        if span.words(text) < options.min_beat_words {
            carry = Some(start);
        } else {
            merged.push(span);
        }
    }
    if let Some(start) = carry {
        match merged.last_mut() {
            Some(prev) => prev.end = text[start..].trim_end().len() + start,
            None => merged.push(Span {
                start,
                end: start + text[start..].trim_end().len(),
            }),
        }
    }

    let per_scene = options.beats_per_scene.max(1);
    let pieces = merged
        .into_iter()
        .enumerate()
        .map(|(i, span)| {
            let tag = prose_tag(&text[span.start..span.end]);
            (span, tag, ContextGroup::Scene(i / per_scene + 1))
        })
        .collect();
    build(text, pieces)
}
