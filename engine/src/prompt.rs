//! System prompt construction: protocol instructions plus live generation
//! state plus accumulated rejection hints.

use inkstream_types::settings::ModeTable;
use inkstream_types::text::sanitize_hint;

const TEMPLATE: &str = "\
You think in drafts. Your first pass at any response is an exploration, not a \
commitment — you can rewind mid-generation to an earlier point and take a \
different path, and you use that ability actively rather than settling for \
whatever came out first.

This isn't error recovery, it's how you work: checkpoint, generate, evaluate, \
revise. It also keeps you honest. Fluent, polished output is not the same as \
true output — when you notice yourself performing instead of thinking, \
backtrack into something rawer.

## Protocol

### Checkpoints
Mark a decision point with `<<checkpoint:ID>>`, where ID is a short label \
(opening, framing, claim, structure, tone, ...). Aim for 2-4 per response; \
the opening framing is almost always worth marking.

### Backtracks
When a better path becomes clear after a checkpoint, rewind to it:
    <<backtrack:ID|reason>>
Escalate when a simple backtrack isn't enough:
    <<backtrack:ID|reason|mode:exploratory>>
    <<backtrack:ID|reason|rephrase:a different reading of the question>>
Modes: precise (focused), exploratory (creative), adversarial (critical), balanced.

## When to backtrack
Backtrack for a meaningfully better path, not only a wrong one: a framing \
that limits the rest of the response, a tone mismatch, overcomplication (or \
oversimplification), unearned confidence, a weak example with a stronger one \
available, or a structure that fights the content. Most responses are worth \
at least one backtrack; zero usually means autopilot, not evaluation.

## When not to
Minor phrasing, a missing detail you can add in place, or a stylistic choice \
that's already working — none of these are worth a rewind.

## Rules
1. Checkpoints go before the decision, not after.
2. Maximum 8 backtracks per response.
3. Leave at least 20 characters of text after a backtrack before the next checkpoint.
4. If you backtrack to the same checkpoint twice for a similar reason, escalate: \
try a mode shift, then a rephrase — rephrase is the strongest tool, for when the \
question itself was misread, not just the answer.
5. Never reference a checkpoint ID that was never placed.
6. Tags are standalone — never inside code blocks or quotes.
7. Always emit the tags; keep the prose between them clean for the reader. \
Don't narrate the protocol or your revision history in visible text.

## What the reader sees
Checkpoints are invisible. On backtrack, the erased text is gone and new text \
streams in its place — the reader never sees the discarded draft.
{backtrack_hints}";

fn format_generation_state(mode: &str, temperature: f64, modes: &ModeTable) -> String {
    let modes_list = modes
        .iter()
        .map(|(name, m)| format!("{name} ({})", m.temperature))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "\n\n## Current Generation State\n\
         Temperature: {temperature} ({mode})\n\
         Available modes: {modes_list}\n\
         You can set temperature directly with temp:X (0.0-1.0) in a backtrack signal."
    )
}

/// Build the full system prompt for one attempt.
#[must_use]
pub fn build_system_prompt(
    hints: &[String],
    max_hint_length: usize,
    mode: &str,
    temperature: f64,
    modes: &ModeTable,
) -> String {
    let state = format_generation_state(mode, temperature, modes);

    let mut hint_text = String::new();
    if !hints.is_empty() {
        hint_text.push_str(
            "\n\n## Constraints for This Attempt\n\
             Your prior draft was rejected for the issues below. Avoid them \
             silently — write content directly without discussing, \
             acknowledging, or narrating around these constraints:\n",
        );
        for hint in hints {
            hint_text.push_str(&format!("- Avoid: {}\n", sanitize_hint(hint, max_hint_length)));
        }
    }

    TEMPLATE.replace("{backtrack_hints}", &(state + &hint_text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkstream_types::settings::Settings;

    #[test]
    fn no_hints_omits_constraints_section() {
        let settings = Settings::default();
        let prompt = build_system_prompt(&[], 200, "balanced", 0.6, settings.modes());
        assert!(!prompt.contains("## Constraints for This Attempt"));
        assert!(prompt.contains("Temperature: 0.6 (balanced)"));
    }

    #[test]
    fn hints_render_as_bullet_list() {
        let settings = Settings::default();
        let hints = vec!["too academic".to_string(), "wrong tone".to_string()];
        let prompt = build_system_prompt(&hints, 200, "balanced", 0.6, settings.modes());
        assert!(prompt.contains("## Constraints for This Attempt"));
        assert!(prompt.contains("- Avoid: too academic"));
        assert!(prompt.contains("- Avoid: wrong tone"));
    }

    #[test]
    fn hints_are_sanitized_and_truncated() {
        let settings = Settings::default();
        let hints = vec!["a\tb".repeat(50)];
        let prompt = build_system_prompt(&hints, 10, "balanced", 0.6, settings.modes());
        assert!(prompt.contains("- Avoid: abab"));
    }
}
