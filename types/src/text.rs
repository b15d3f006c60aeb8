//! Text helpers shared by the prompt builder and orchestrator.

use unicode_segmentation::UnicodeSegmentation;

/// Bound a rejection hint's length and strip non-printable characters so it
/// is inert when interpolated into a system prompt.
///
/// Filtering happens before truncation, not after: a hint full of
/// non-printable characters followed by real content should not be
/// truncated away before the filter ever runs.
#[must_use]
pub fn sanitize_hint(hint: &str, max_length: usize) -> String {
    let cleaned: String = hint.chars().filter(|&c| is_printable(c)).collect();
    cleaned.graphemes(true).take(max_length).collect()
}

/// Mirrors Python's `str.isprintable() or c == ' '`: plain space is kept,
/// every other control, whitespace, or invisible-formatting character is
/// dropped. `is_control`/`is_whitespace` cover the control and separator
/// categories; the explicit ranges below catch the zero-width and
/// bidi-control format characters neither predicate sees.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    if c.is_control() || c.is_whitespace() {
        return false;
    }
    !matches!(c,
        '\u{00AD}'
        | '\u{200B}'..='\u{200F}'
        | '\u{202A}'..='\u{202E}'
        | '\u{2060}'..='\u{2064}'
        | '\u{FEFF}'
    )
}
