// First artifact of a thread.

use canvas_common::types::ArtifactDraft;
use tracing::info;

use super::{assemble_for, extract_title, strip_code_fence, HandlerContext, HandlerOutput};
use crate::error::EngineError;
use crate::llm::{split_thinking, GenerationRequest};
use crate::prompts;
use crate::state::ConversationState;

pub async fn generate_artifact(
    state: &ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerOutput, EngineError> {
    if state.messages.is_empty() {
        return Err(EngineError::validation("cannot generate an artifact without any messages"));
    }

    let assembled = assemble_for(state, &ctx, None);
    if assembled.exceeds_hard_limit() {
        return Ok(HandlerOutput::too_large());
    }

    let response = ctx
        .generate(GenerationRequest::new(
            "generate",
            prompts::DEFAULT_SYSTEM,
            prompts::generate_prompt(&assembled.transcript, assembled.reflections.as_deref()),
        ))
        .await?;

    let (reasoning, visible) = split_thinking(&response);
    let draft = draft_from_response(&visible);
    info!(kind = draft.kind.as_str(), bytes = draft.content.len(), "generated artifact");
    Ok(HandlerOutput::version(draft).with_reasoning(reasoning))
}

/// A single fenced block becomes a code artifact; anything else is text.
pub(super) fn draft_from_response(response: &str) -> ArtifactDraft {
    let (title, body) = extract_title(response);
    match strip_code_fence(body) {
        Some((language, code)) => ArtifactDraft::code(title, language, code),
        None => ArtifactDraft::text(title, body.trim()),
    }
}
