//! Post-processing: deterministic cleanup of model-generated text.
//!
//! Even well-prompted models wrap output in code fences, open with
//! "Sure! Here is your script:" or close with "Let me know if you'd like
//! changes". These rules strip such artefacts without touching content, so
//! prompts stay focused on *what to write*.
//!
//! [`clean_fragment`] runs on every fragment result before it is cached,
//! which keeps cached and fresh output byte-identical. [`finalize_document`]
//! runs once on the assembled document.
//!
//! ## Rule Order
//!
//! Line endings are normalised before anything matches on `\n`, fences are
//! stripped before chatter detection so the preamble line is really the
//! first line, and blank-line collapsing runs after removals that can leave
//! gaps behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one fragment's generated text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip outer code fences
/// 3. Drop a conversational preamble line
/// 4. Drop a conversational sign-off line
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Trim trailing whitespace per line
/// 7. Ensure headings are preceded by a blank line
/// 8. Collapse 2+ blank lines into one
/// 9. Trim surrounding blank lines
pub fn clean_fragment(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_code_fences(&s);
    let s = strip_preamble(&s);
    let s = strip_sign_off(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = normalise_heading_spacing(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

/// Final pass over an assembled document: blank-line collapsing and a
/// single trailing newline.
pub fn finalize_document(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[\w-]*\n(.*)\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rules 3–4: Conversational chatter ────────────────────────────────────────

static RE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(sure|certainly|of course|absolutely|okay|ok)?[!,.]?\s*(here('s| is| are)|below is)\b[^\n]*:\s*$",
    )
    .unwrap()
});

static RE_SIGN_OFF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(let me know|i hope this|feel free to|would you like|if you('d| would) like)\b[^\n]*$",
    )
    .unwrap()
});

fn strip_preamble(input: &str) -> String {
    let trimmed = input.trim_start_matches('\n');
    match trimmed.split_once('\n') {
        Some((first, rest)) if RE_PREAMBLE.is_match(first) => strip_code_fences(rest),
        _ => input.to_string(),
    }
}

fn strip_sign_off(input: &str) -> String {
    let trimmed = input.trim_end();
    match trimmed.rsplit_once('\n') {
        Some((rest, last)) if RE_SIGN_OFF.is_match(last) => rest.to_string(),
        _ => input.to_string(),
    }
}

// ── Rule 5: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 6: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 7: Normalise heading spacing ────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6} \S").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    for (i, line) in input.lines().enumerate() {
        if i > 0 && RE_HEADING.is_match(line) {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 8: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}
