//! Format-specific assembly of fragment outputs into one document.
//!
//! Fragments are emitted in order and grouped by the [`ContextMap`] built
//! at segmentation time; each group gets the format's heading and
//! templated intro/outro. Fragments without output keep their place as an
//! HTML comment so the gap is visible and the ordering is preserved.

use crate::document::{FragmentId, TargetFormat};
use crate::error::RepurposeError;
use crate::pipeline::chunk::{ContextGroup, ContextMap};
use crate::pipeline::postprocess::finalize_document;

/// What a fragment position contributes to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<'a> {
    Text(&'a str),
    Failed(&'a FragmentId),
    Unplanned(&'a FragmentId),
}

impl Slot<'_> {
    fn render(&self) -> String {
        match self {
            Slot::Text(t) => t.to_string(),
            Slot::Failed(id) => format!("<!-- {id}: generation failed -->"),
            Slot::Unplanned(id) => format!("<!-- {id}: not processed (budget exhausted) -->"),
        }
    }
}

/// Assemble `slots` (one per fragment, in order) into the final document.
///
/// A document whose only gaps are unplanned fragments still assembles, as a
/// skeleton of placeholders. One where every fragment failed does not.
pub fn assemble(
    format: TargetFormat,
    title: &str,
    target_language: Option<&str>,
    context_map: &ContextMap,
    slots: &[Slot<'_>],
) -> Result<String, RepurposeError> {
    if slots.is_empty() {
        return Err(RepurposeError::Assembly("no fragments to assemble".into()));
    }
    if context_map.len() != slots.len() {
        return Err(RepurposeError::Assembly(format!(
            "context map covers {} fragments, got {} results",
            context_map.len(),
            slots.len()
        )));
    }
    if slots.iter().all(|s| matches!(s, Slot::Failed(_))) {
        return Err(RepurposeError::Assembly(
            "no fragment produced output".into(),
        ));
    }

    let mut out = match (format, target_language) {
        (TargetFormat::Translation, Some(lang)) => format!("# {title} ({lang})\n\n"),
        _ => format!("# {title}\n\n"),
    };

    let mut current: Option<&ContextGroup> = None;
    for (i, slot) in slots.iter().enumerate() {
        let group = context_map
            .group(i)
            .ok_or_else(|| RepurposeError::Assembly(format!("fragment {i} has no group")))?;
        if current != Some(group) {
            if let Some(prev) = current {
                out.push_str(&group_outro(format, title, prev));
            }
            out.push_str(&group_intro(format, title, group));
            current = Some(group);
        }
        out.push_str(&slot.render());
        out.push_str("\n\n");
    }
    if let Some(last) = current {
        out.push_str(&group_outro(format, title, last));
    }

    Ok(finalize_document(&out))
}

fn group_intro(format: TargetFormat, title: &str, group: &ContextGroup) -> String {
    match (format, group) {
        (TargetFormat::Podcast, ContextGroup::Episode(n)) => format!(
            "## Episode {n}\n\n[INTRO] Welcome to episode {n} of \"{title}\".\n\n"
        ),
        (TargetFormat::Translation, ContextGroup::Part) => String::new(),
        (_, g) => format!("## {}\n\n", g.label()),
    }
}

fn group_outro(format: TargetFormat, title: &str, group: &ContextGroup) -> String {
    match (format, group) {
        (TargetFormat::Podcast, ContextGroup::Episode(n)) => format!(
            "[OUTRO] That wraps up episode {n} of \"{title}\". Thanks for listening.\n\n"
        ),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentOptions;
    use crate::document::{Document, Fragment, FragmentTag};
    use crate::pipeline::chunk::segment;

    fn podcast_map(paragraphs: usize) -> ContextMap {
        let body = (0..paragraphs)
            .map(|i| format!("Paragraph {i} has exactly six words."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let options = SegmentOptions {
            words_per_minute: 10,
            segment_minutes: 1.0,
            episode_minutes: 2.0,
            ..SegmentOptions::default()
        };
        segment(&Document::new("T", body), TargetFormat::Podcast, &options).context_map
    }

    #[test]
    fn podcast_episodes_get_intro_and_outro() {
        let map = podcast_map(4);
        let texts: Vec<String> = (0..map.len()).map(|i| format!("segment {i}")).collect();
        let slots: Vec<Slot<'_>> = texts.iter().map(|t| Slot::Text(t)).collect();
        let out = assemble(TargetFormat::Podcast, "Show", None, &map, &slots).unwrap();

        assert!(out.starts_with("# Show\n\n## Episode 1\n\n[INTRO]"));
        assert_eq!(out.matches("[INTRO]").count(), map.group_count());
        assert_eq!(out.matches("[OUTRO]").count(), map.group_count());
        let positions: Vec<usize> = texts.iter().map(|t| out.find(t.as_str()).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(out.ends_with("Thanks for listening.\n"));
    }

    #[test]
    fn gaps_keep_their_place() {
        let map = podcast_map(3);
        let ids: Vec<FragmentId> = (0..map.len())
            .map(|i| Fragment::new(i, i, format!("{i}"), FragmentTag::Narration).id)
            .collect();
        let mut slots: Vec<Slot<'_>> = vec![Slot::Text("first")];
        slots.extend(ids.iter().skip(1).map(Slot::Unplanned));
        let out = assemble(TargetFormat::Podcast, "Show", None, &map, &slots).unwrap();
        let first = out.find("first").unwrap();
        let gap = out.find("not processed").unwrap();
        assert!(first < gap);
    }

    #[test]
    fn translation_title_names_language() {
        let doc = Document::new("Guide", "One.\n\nTwo.");
        let seg = segment(&doc, TargetFormat::Translation, &SegmentOptions::default());
        let slots: Vec<Slot<'_>> = (0..seg.context_map.len()).map(|_| Slot::Text("Un.")).collect();
        let out = assemble(TargetFormat::Translation, "Guide", Some("fr"), &seg.context_map, &slots)
            .unwrap();
        assert!(out.starts_with("# Guide (fr)\n\nUn."));
        assert!(!out.contains("## "));
    }

    #[test]
    fn nothing_to_assemble_is_an_error() {
        let map = podcast_map(1);
        let id = Fragment::new(0, 0, "x", FragmentTag::Narration).id;
        let slots = vec![Slot::Failed(&id)];
        assert!(matches!(
            assemble(TargetFormat::Podcast, "T", None, &map, &slots),
            Err(RepurposeError::Assembly(_))
        ));
        assert!(assemble(TargetFormat::Podcast, "T", None, &map, &[]).is_err());
    }

    #[test]
    fn all_unplanned_assembles_placeholders() {
        let map = podcast_map(2);
        let ids: Vec<FragmentId> = (0..map.len())
            .map(|i| Fragment::new(i, i, format!("{i}"), FragmentTag::Narration).id)
            .collect();
        let slots: Vec<Slot<'_>> = ids.iter().map(Slot::Unplanned).collect();
        let out = assemble(TargetFormat::Podcast, "Show", None, &map, &slots).unwrap();
        assert!(out.starts_with("# Show\n"));
        assert_eq!(out.matches("not processed").count(), map.len());
    }

    #[test]
    fn mismatched_map_is_an_error() {
        let map = podcast_map(2);
        let slots: Vec<Slot<'_>> = (0..map.len() + 1).map(|_| Slot::Text("x")).collect();
        assert!(assemble(TargetFormat::Podcast, "T", None, &map, &slots).is_err());
    }
}
