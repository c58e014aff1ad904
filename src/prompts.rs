//! Prompt templates for repurposing fragments.
//!
//! Every template lives here so a wording change touches exactly one place
//! and tests can inspect prompts without a backend. A fragment's
//! [`PromptRole`] picks its template; callers can replace the template with
//! [`crate::config::ProcessingOptions::system_prompt`].

use crate::config::ProcessingOptions;
use crate::document::{FragmentTag, TargetFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which template a fragment is rendered with.
///
/// Derived from the target format and the fragment tag. Roles are part of
/// the cache fingerprint: two fragments with identical text but different
/// roles never share a cached result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    PodcastNarration,
    PodcastDialogue,
    CourseLesson,
    CourseExercise,
    VideoScript,
    VideoDialogue,
    Translation,
}

impl PromptRole {
    pub fn for_fragment(format: TargetFormat, tag: FragmentTag) -> Self {
        match (format, tag) {
            (TargetFormat::Podcast, FragmentTag::Dialogue) => PromptRole::PodcastDialogue,
            (TargetFormat::Podcast, _) => PromptRole::PodcastNarration,
            (TargetFormat::Course, FragmentTag::Exercise) => PromptRole::CourseExercise,
            (TargetFormat::Course, _) => PromptRole::CourseLesson,
            (TargetFormat::ShortVideo, FragmentTag::Dialogue) => PromptRole::VideoDialogue,
            (TargetFormat::ShortVideo, _) => PromptRole::VideoScript,
            // Translation renders every fragment the same way.
            (TargetFormat::Translation, _) => PromptRole::Translation,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PromptRole::PodcastNarration => "podcast_narration",
            PromptRole::PodcastDialogue => "podcast_dialogue",
            PromptRole::CourseLesson => "course_lesson",
            PromptRole::CourseExercise => "course_exercise",
            PromptRole::VideoScript => "video_script",
            PromptRole::VideoDialogue => "video_dialogue",
            PromptRole::Translation => "translation",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            PromptRole::PodcastNarration => PODCAST_NARRATION_PROMPT,
            PromptRole::PodcastDialogue => PODCAST_DIALOGUE_PROMPT,
            PromptRole::CourseLesson => COURSE_LESSON_PROMPT,
            PromptRole::CourseExercise => COURSE_EXERCISE_PROMPT,
            PromptRole::VideoScript => VIDEO_SCRIPT_PROMPT,
            PromptRole::VideoDialogue => VIDEO_DIALOGUE_PROMPT,
            PromptRole::Translation => TRANSLATION_PROMPT,
        }
    }
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rules shared by every template.
const OUTPUT_RULES: &str = r#"
OUTPUT RULES
- Output ONLY the requested content
- Do NOT wrap the output in code fences
- Do NOT add commentary, notes or explanations about what you did
- Do NOT invent facts that are not supported by the source passage"#;

pub const PODCAST_NARRATION_PROMPT: &str = r#"You are a podcast script writer. Rewrite the source passage as a spoken segment for a single host.

- Write for the ear: short sentences, natural transitions, no visual references
- Keep every key idea of the passage, in the same order
- Do not add an intro or outro; this segment sits inside a longer episode"#;

pub const PODCAST_DIALOGUE_PROMPT: &str = r#"You are a podcast script writer. The source passage contains dialogue. Rewrite it as a spoken exchange between two hosts.

- Label every line with the speaker, e.g. "HOST A:" and "HOST B:"
- Preserve who said what in the source; keep quotations faithful
- Do not add an intro or outro; this segment sits inside a longer episode"#;

pub const COURSE_LESSON_PROMPT: &str = r#"You are an instructional designer. Turn the source passage into a lesson section.

- Start with one sentence stating the learning objective
- Explain the concepts in order, using Markdown headings (###) and lists
- End with a two-bullet "Key takeaways" list"#;

pub const COURSE_EXERCISE_PROMPT: &str = r#"You are an instructional designer. The source passage is an exercise or quiz section. Turn it into practice material.

- Write numbered questions that test the concepts in the passage
- After the questions, add an "Answers" list with a short worked answer for each
- Keep the difficulty appropriate for the stated audience"#;

pub const VIDEO_SCRIPT_PROMPT: &str = r#"You are a short-form video script writer. Turn the source passage into one beat of a vertical video.

- One hook line, then at most three short spoken lines
- Put on-screen text in square brackets, e.g. [TEXT: Fast facts]
- The beat must be speakable in under 20 seconds"#;

pub const VIDEO_DIALOGUE_PROMPT: &str = r#"You are a short-form video script writer. The source passage contains dialogue. Turn it into one beat of a vertical video with on-screen speakers.

- Label each spoken line with its speaker
- Put on-screen text in square brackets, e.g. [TEXT: "Quote"]
- The beat must be speakable in under 20 seconds"#;

pub const TRANSLATION_PROMPT: &str = r#"You are a professional translator. Translate the source passage into the target language.

- Translate everything; do not summarise or omit sentences
- Preserve paragraphs, Markdown structure, names and numbers
- Keep quotations as quotations"#;

/// The two messages sent for one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Text length used for fallback cost accounting.
    pub fn text_len(&self) -> usize {
        self.system.len() + self.user.len()
    }

    pub fn as_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

/// Build the prompt for one fragment.
///
/// `context` is the rendered document digest (advisory), `content` the
/// (possibly compressed) fragment text.
pub fn build_prompt(
    role: PromptRole,
    options: &ProcessingOptions,
    context: &str,
    content: &str,
) -> Prompt {
    let mut system = options
        .system_prompt
        .clone()
        .unwrap_or_else(|| role.template().to_string());
    system.push('\n');
    system.push_str(OUTPUT_RULES);

    let mut directives = Vec::new();
    if let Some(lang) = &options.target_language {
        directives.push(format!("- Write the output in {lang}"));
    }
    if let Some(tone) = &options.tone {
        directives.push(format!("- Tone: {tone}"));
    }
    if let Some(audience) = &options.audience {
        directives.push(format!("- Audience: {audience}"));
    }
    for (k, v) in &options.extra {
        directives.push(format!("- {k}: {v}"));
    }
    if !directives.is_empty() {
        system.push_str("\n\nREQUEST\n");
        system.push_str(&directives.join("\n"));
    }

    let mut user = String::new();
    if !context.is_empty() {
        user.push_str("Background on the whole document (for reference only; do not rewrite it):\n");
        user.push_str(context);
        user.push('\n');
    }
    user.push_str("Source passage:\n\"\"\"\n");
    user.push_str(content);
    user.push_str("\n\"\"\"");

    Prompt { system, user }
}
