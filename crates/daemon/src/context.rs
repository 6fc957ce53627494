// Size-bounded prompt context assembly.
//
// Sizes are UTF-8 byte lengths. Every cut lands on a char boundary.

use canvas_common::types::Message;
use tracing::warn;

use crate::config::ContextConfig;

/// Transcript stand-in when a degraded turn keeps no history at all.
pub const TRUNCATION_NOTICE: &str =
    "[Conversation history truncated due to large artifact/reflections]";

/// Appended to an artifact that had to be cut.
pub const ARTIFACT_TRUNCATION_MARKER: &str = "\n\n[... artifact truncated ...]";

/// Fixed reply used instead of a generation call when the input cannot fit.
pub const TOO_LARGE_REPLY: &str = "I apologize, but the input is too large for me to process. \
Please try with a smaller artifact or shorter conversation history.";

const MESSAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub total: usize,
    pub reserve: usize,
    pub degrade_floor: usize,
}

impl Budget {
    pub fn for_handlers(config: &ContextConfig) -> Self {
        Self {
            total: config.budget_bytes,
            reserve: config.handler_reserve_bytes,
            degrade_floor: config.handler_degrade_floor_bytes,
        }
    }

    pub fn for_follow_up(config: &ContextConfig) -> Self {
        Self {
            total: config.budget_bytes,
            reserve: config.followup_reserve_bytes,
            degrade_floor: config.followup_degrade_floor_bytes,
        }
    }

    /// 120 % of the budget.
    pub fn hard_limit(&self) -> usize {
        self.total.saturating_mul(6) / 5
    }

    fn artifact_degrade_threshold(&self) -> usize {
        self.total.saturating_mul(3) / 5
    }

    fn artifact_degrade_target(&self) -> usize {
        self.total / 2
    }

    fn reflection_degrade_cap(&self) -> usize {
        self.total.saturating_mul(2) / 5
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub transcript: String,
    pub artifact_content: Option<String>,
    pub reflections: Option<String>,
    pub degraded: bool,
    pub total_bytes: usize,
    hard_limit: usize,
}

impl Assembled {
    /// Callers must not call generation when this is true.
    pub fn exceeds_hard_limit(&self) -> bool {
        self.total_bytes > self.hard_limit
    }
}

pub fn assemble(
    messages: &[Message],
    artifact_content: Option<&str>,
    reflections: Option<&str>,
    budget: &Budget,
) -> Assembled {
    let artifact_len = artifact_content.map_or(0, str::len);
    let reflections_len = reflections.map_or(0, str::len);
    let fixed = artifact_len + reflections_len + budget.reserve;

    let (transcript, artifact_content, reflections, degraded) = match budget.total.checked_sub(fixed)
    {
        Some(available) if available > 0 => (
            render_transcript(messages, available),
            artifact_content.map(str::to_owned),
            reflections.map(str::to_owned),
            false,
        ),
        _ => {
            let floor = budget.degrade_floor;
            let transcript = if floor < TRUNCATION_NOTICE.len() {
                TRUNCATION_NOTICE.to_owned()
            } else {
                render_transcript(messages, floor)
            };
            let artifact = artifact_content.map(|content| {
                if content.len() > budget.artifact_degrade_threshold() {
                    let mut cut = prefix_within(content, budget.artifact_degrade_target()).to_owned();
                    cut.push_str(ARTIFACT_TRUNCATION_MARKER);
                    cut
                } else {
                    content.to_owned()
                }
            });
            let reflections =
                reflections.map(|r| prefix_within(r, budget.reflection_degrade_cap()).to_owned());
            warn!(
                budget = budget.total,
                artifact_bytes = artifact_len,
                reflection_bytes = reflections_len,
                messages = messages.len(),
                "context over budget; degrading conversation history"
            );
            (transcript, artifact, reflections, true)
        }
    };

    let total_bytes = transcript.len()
        + artifact_content.as_deref().map_or(0, str::len)
        + reflections.as_deref().map_or(0, str::len);
    Assembled {
        transcript,
        artifact_content,
        reflections,
        degraded,
        total_bytes,
        hard_limit: budget.hard_limit(),
    }
}

/// One message per block, `role: text`.
pub fn format_message(message: &Message) -> String {
    format!("{}: {}", message.role.as_str(), message.text())
}

pub fn format_transcript(messages: &[Message]) -> String {
    messages.iter().map(format_message).collect::<Vec<_>>().join(MESSAGE_SEPARATOR)
}

/// Serialize newest-first into at most `limit` bytes, dropping the oldest
/// messages. The newest message is always kept, cut to its tail if needed.
fn render_transcript(messages: &[Message], limit: usize) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut used = 0usize;

    for message in messages.iter().rev() {
        let block = format_message(message);
        let cost = if kept.is_empty() { block.len() } else { block.len() + MESSAGE_SEPARATOR.len() };
        if used + cost <= limit {
            used += cost;
            kept.push(block);
        } else {
            if kept.is_empty() {
                kept.push(suffix_within(&block, limit).to_owned());
            }
            break;
        }
    }

    kept.reverse();
    kept.join(MESSAGE_SEPARATOR)
}

/// Longest prefix of `s` that fits in `max` bytes.
pub fn prefix_within(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Longest suffix of `s` that fits in `max` bytes.
pub fn suffix_within(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn budget(total: usize, reserve: usize, degrade_floor: usize) -> Budget {
        Budget { total, reserve, degrade_floor }
    }

    fn conversation(texts: &[&str]) -> Vec<Message> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| if i % 2 == 0 { Message::user(*text) } else { Message::assistant(*text) })
            .collect()
    }

    #[test]
    fn small_inputs_pass_through() {
        let messages = conversation(&["hi", "hello"]);
        let assembled = assemble(&messages, Some("doc"), Some("rules"), &budget(1000, 100, 0));
        assert!(!assembled.degraded);
        assert_eq!(assembled.transcript, "user: hi\n\nassistant: hello");
        assert_eq!(assembled.artifact_content.as_deref(), Some("doc"));
        assert_eq!(assembled.total_bytes, assembled.transcript.len() + 3 + 5);
        assert!(!assembled.exceeds_hard_limit());
    }

    #[test]
    fn oldest_messages_drop_first() {
        let messages = conversation(&["first message", "second message", "third"]);
        // Room for "user: third" plus one separator and a bit, not the second block.
        let assembled = assemble(&messages, None, None, &budget(20, 0, 0));
        assert!(!assembled.degraded);
        assert_eq!(assembled.transcript, "user: third");
    }

    #[test]
    fn newest_message_is_cut_to_its_tail() {
        let messages = conversation(&["a very long final message"]);
        let assembled = assemble(&messages, None, None, &budget(8, 0, 0));
        assert_eq!(assembled.transcript, " message");
    }

    #[test]
    fn oversized_artifact_degrades_with_placeholder() {
        let artifact = "x".repeat(900);
        let messages = conversation(&["please edit"]);
        let assembled = assemble(&messages, Some(&artifact), None, &budget(1000, 200, 0));
        assert!(assembled.degraded);
        assert_eq!(assembled.transcript, TRUNCATION_NOTICE);
        let content = assembled.artifact_content.expect("artifact should be kept");
        assert!(content.starts_with(&"x".repeat(500)));
        assert!(content.ends_with(ARTIFACT_TRUNCATION_MARKER));
        assert_eq!(content.len(), 500 + ARTIFACT_TRUNCATION_MARKER.len());
    }

    #[test]
    fn degraded_transcript_respects_floor() {
        let artifact = "y".repeat(550);
        let messages = conversation(&["one", "two", "three hundred"]);
        let assembled = assemble(&messages, Some(&artifact), None, &budget(600, 100, 120));
        assert!(assembled.degraded);
        assert_eq!(assembled.artifact_content.as_deref(), Some(artifact.as_str()));
        assert!(assembled.transcript.len() <= 120);
        assert!(assembled.transcript.ends_with("user: three hundred"));
    }

    #[test]
    fn hard_limit_flags_huge_inputs() {
        let reflections = "r".repeat(1000);
        let artifact = "a".repeat(590);
        let long = "m".repeat(400);
        let messages = conversation(&[long.as_str()]);
        let assembled =
            assemble(&messages, Some(&artifact), Some(&reflections), &budget(1000, 0, 500));
        assert!(assembled.degraded);
        assert!(assembled.exceeds_hard_limit());
    }

    #[test]
    fn cuts_respect_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(prefix_within(text, 2), "h");
        assert_eq!(suffix_within(text, 4), "rld");
        assert_eq!(suffix_within(text, 5), "örld");
    }

    proptest! {
        #[test]
        fn transcript_never_exceeds_budget_plus_floor(
            texts in proptest::collection::vec("\\PC{0,40}", 0..12),
            artifact in proptest::option::of("\\PC{0,400}"),
            reflections in proptest::option::of("\\PC{0,200}"),
            total in 1usize..600,
            reserve in 0usize..100,
            floor in 0usize..300,
        ) {
            let messages: Vec<Message> = texts.iter().map(|t| Message::user(t.as_str())).collect();
            let b = budget(total, reserve, floor);
            let assembled = assemble(&messages, artifact.as_deref(), reflections.as_deref(), &b);
            let bound = b.total + floor.max(TRUNCATION_NOTICE.len());
            prop_assert!(assembled.transcript.len() <= bound);
            let expected_total = assembled.transcript.len()
                + assembled.artifact_content.as_deref().map_or(0, str::len)
                + assembled.reflections.as_deref().map_or(0, str::len);
            prop_assert_eq!(assembled.total_bytes, expected_total);
        }

        #[test]
        fn newest_message_survives_when_room_exists(
            texts in proptest::collection::vec("[a-z ]{1,30}", 1..8),
            total in 64usize..400,
        ) {
            let messages: Vec<Message> = texts.iter().map(|t| Message::user(t.as_str())).collect();
            let assembled = assemble(&messages, None, None, &budget(total, 0, 0));
            let newest = format_message(messages.last().expect("non-empty"));
            prop_assert!(assembled.transcript.ends_with(&newest));
        }
    }
}
