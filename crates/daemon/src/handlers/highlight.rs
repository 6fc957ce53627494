// Range rewrites: a highlighted slice of code, or a highlighted block of
// markdown.

use canvas_common::command::CodeHighlight;
use canvas_common::types::{ArtifactDraft, ArtifactKind, ArtifactVersion, Role};
use tracing::info;

use super::{require_user_message, strip_code_fence, HandlerContext, HandlerOutput};
use crate::error::EngineError;
use crate::llm::{split_thinking, GenerationRequest};
use crate::prompts;
use crate::state::ConversationState;

/// Characters of surrounding code shown on each side of a highlight.
pub const CODE_CONTEXT_CHARS: usize = 500;

fn require_kind<'s>(
    state: &'s ConversationState,
    kind: ArtifactKind,
) -> Result<&'s ArtifactVersion, EngineError> {
    let current = state.current_version().ok_or_else(|| {
        EngineError::validation("cannot rewrite a highlighted range: the thread has no artifact")
    })?;
    if current.kind != kind {
        return Err(EngineError::validation(format!(
            "highlighted range expects a {} artifact, found {}",
            kind.as_str(),
            current.kind.as_str()
        )));
    }
    Ok(current)
}

/// Highlight offsets resolved to byte positions within the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeWindow {
    pub window_start: usize,
    pub start: usize,
    pub end: usize,
    pub window_end: usize,
}

/// Resolve character offsets into byte offsets plus a ±500 character window.
pub fn code_window(code: &str, highlight: CodeHighlight) -> Result<CodeWindow, EngineError> {
    let CodeHighlight { start_offset, end_offset } = highlight;
    let char_count = code.chars().count();
    if start_offset > end_offset || end_offset > char_count {
        return Err(EngineError::validation(format!(
            "highlight [{start_offset}, {end_offset}) is outside the code (length {char_count})"
        )));
    }

    let byte_at = |char_offset: usize| {
        code.char_indices().nth(char_offset).map_or(code.len(), |(byte, _)| byte)
    };
    Ok(CodeWindow {
        window_start: byte_at(start_offset.saturating_sub(CODE_CONTEXT_CHARS)),
        start: byte_at(start_offset),
        end: byte_at(end_offset),
        window_end: byte_at((end_offset + CODE_CONTEXT_CHARS).min(char_count)),
    })
}

pub async fn rewrite_code(
    state: &ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerOutput, EngineError> {
    let highlight = state
        .flags
        .highlighted_code
        .ok_or_else(|| EngineError::validation("no highlighted code range was given"))?;
    let current = require_kind(state, ArtifactKind::Code)?;
    let latest = require_user_message(state)?;
    let code = current.content.as_str();
    let window = code_window(code, highlight)?;

    let reflections = state.rendered_reflections();
    let system = prompts::code_highlight_prompt(
        &code[window.window_start..window.start],
        &code[window.start..window.end],
        &code[window.end..window.window_end],
        reflections.as_deref(),
    );
    let response = ctx
        .generate(GenerationRequest::new("highlight_code", system, latest.text()))
        .await?;

    let (reasoning, visible) = split_thinking(&response);
    let replacement = strip_code_fence(&visible).map_or(visible, |(_, code)| code);
    let mut updated = String::with_capacity(code.len() + replacement.len());
    updated.push_str(&code[..window.start]);
    updated.push_str(&replacement);
    updated.push_str(&code[window.end..]);

    info!(
        from_index = current.index,
        start = highlight.start_offset,
        end = highlight.end_offset,
        "rewrote highlighted code"
    );
    Ok(HandlerOutput::version(ArtifactDraft::revise(current, updated)).with_reasoning(reasoning))
}

pub async fn rewrite_markdown(
    state: &ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerOutput, EngineError> {
    let highlight = state
        .flags
        .highlighted_text
        .as_ref()
        .ok_or_else(|| EngineError::validation("no highlighted text was given"))?;
    let current = require_kind(state, ArtifactKind::Text)?;
    let latest = match state.last_message() {
        Some(message) if message.role == Role::User => message,
        _ => return Err(EngineError::validation("the latest message must be a user message")),
    };
    if highlight.containing_block.is_empty()
        || !highlight.full_document.contains(&highlight.containing_block)
    {
        return Err(EngineError::validation(
            "highlighted block was not found in the document; it may have changed",
        ));
    }

    let reflections = state.rendered_reflections();
    let system = prompts::markdown_highlight_prompt(
        &highlight.selected_text,
        &highlight.containing_block,
        reflections.as_deref(),
    );
    let response = ctx
        .generate(GenerationRequest::new("highlight_text", system, latest.text()))
        .await?;

    let (reasoning, visible) = split_thinking(&response);
    let occurrences = highlight.full_document.matches(highlight.containing_block.as_str()).count();
    let updated = highlight.full_document.replace(&highlight.containing_block, &visible);
    info!(from_index = current.index, occurrences, "rewrote highlighted block");
    Ok(HandlerOutput::version(ArtifactDraft::revise(current, updated)).with_reasoning(reasoning))
}
