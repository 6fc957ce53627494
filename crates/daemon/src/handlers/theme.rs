// Whole-artifact theme transforms for text and code.

use canvas_common::command::{ArtifactLength, CommandFlags, ReadingLevel};
use canvas_common::types::{ArtifactDraft, ArtifactKind, ArtifactVersion};
use tracing::info;

use super::{strip_code_fence, HandlerContext, HandlerOutput};
use crate::error::EngineError;
use crate::llm::{split_thinking, GenerationRequest};
use crate::prompts;
use crate::state::ConversationState;

/// Audience phrase for a reading level; `None` for the pirate voice.
pub fn audience_phrase(level: ReadingLevel) -> Option<&'static str> {
    match level {
        ReadingLevel::Pirate => None,
        ReadingLevel::Child => Some("elementary school student"),
        ReadingLevel::Teenager => Some("high school student"),
        ReadingLevel::College => Some("college student"),
        ReadingLevel::Phd => Some("PhD student"),
    }
}

pub fn length_phrase(length: ArtifactLength) -> &'static str {
    match length {
        ArtifactLength::Shortest => "much shorter than it currently is",
        ArtifactLength::Short => "slightly shorter than it currently is",
        ArtifactLength::Long => "slightly longer than it currently is",
        ArtifactLength::Longest => "much longer than it currently is",
    }
}

/// Display name for a port target; unknown identifiers pass through.
pub fn language_display_name(language: &str) -> &str {
    match language {
        "typescript" => "TypeScript",
        "javascript" => "JavaScript",
        "cpp" => "C++",
        "java" => "Java",
        "php" => "PHP",
        "python" => "Python",
        "html" => "HTML",
        "sql" => "SQL",
        "rust" => "Rust",
        other => other,
    }
}

/// Prompt for the first text theme present: language, reading level,
/// length, then emoji.
pub fn text_theme_prompt(flags: &CommandFlags, content: &str, reflections: Option<&str>) -> Option<String> {
    if let Some(language) = &flags.language {
        return Some(prompts::language_prompt(language, content, reflections));
    }
    if let Some(level) = flags.reading_level {
        return Some(match audience_phrase(level) {
            Some(audience) => prompts::reading_level_prompt(audience, content, reflections),
            None => prompts::pirate_prompt(content, reflections),
        });
    }
    if let Some(length) = flags.artifact_length {
        return Some(prompts::length_prompt(length_phrase(length), content, reflections));
    }
    flags.regenerate_with_emojis.then(|| prompts::emoji_prompt(content, reflections))
}

/// Prompt for the first code theme present: comments, port, logs, then bug fixes.
pub fn code_theme_prompt(flags: &CommandFlags, code: &str) -> Option<String> {
    if flags.add_comments {
        return Some(prompts::add_comments_prompt(code));
    }
    if let Some(language) = &flags.port_language {
        return Some(prompts::port_language_prompt(language_display_name(language), code));
    }
    if flags.add_logs {
        return Some(prompts::add_logs_prompt(code));
    }
    flags.fix_bugs.then(|| prompts::fix_bugs_prompt(code))
}

fn require_kind(state: &ConversationState, kind: ArtifactKind) -> Result<&ArtifactVersion, EngineError> {
    let current = state
        .current_version()
        .ok_or_else(|| EngineError::validation("cannot apply a theme: the thread has no artifact"))?;
    if current.kind != kind {
        return Err(EngineError::validation(format!(
            "theme expects a {} artifact, found {}",
            kind.as_str(),
            current.kind.as_str()
        )));
    }
    Ok(current)
}

pub async fn rewrite_text_theme(
    state: &ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerOutput, EngineError> {
    let current = require_kind(state, ArtifactKind::Text)?;
    let reflections = state.rendered_reflections();
    let prompt = text_theme_prompt(&state.flags, &current.content, reflections.as_deref())
        .ok_or_else(|| EngineError::validation("no text theme was selected"))?;

    let response = ctx
        .generate(GenerationRequest::new("text_theme", prompts::DEFAULT_SYSTEM, prompt))
        .await?;
    let (reasoning, visible) = split_thinking(&response);
    info!(from_index = current.index, "applied text theme");
    Ok(HandlerOutput::version(ArtifactDraft::revise(current, visible.trim())).with_reasoning(reasoning))
}

pub async fn rewrite_code_theme(
    state: &ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerOutput, EngineError> {
    let current = require_kind(state, ArtifactKind::Code)?;
    let prompt = code_theme_prompt(&state.flags, &current.content)
        .ok_or_else(|| EngineError::validation("no code theme was selected"))?;

    let response = ctx
        .generate(GenerationRequest::new("code_theme", prompts::DEFAULT_SYSTEM, prompt))
        .await?;
    let (reasoning, visible) = split_thinking(&response);
    let code = strip_code_fence(&visible).map_or(visible, |(_, code)| code);

    let mut draft = ArtifactDraft::revise(current, code);
    if let Some(language) = &state.flags.port_language {
        draft.language = Some(language.clone());
    }
    info!(from_index = current.index, language = draft.language.as_deref(), "applied code theme");
    Ok(HandlerOutput::version(draft).with_reasoning(reasoning))
}
