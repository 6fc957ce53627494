// Conversational answer with no artifact change.

use canvas_common::types::Message;

use super::{assemble_for, require_user_message, HandlerContext, HandlerOutput};
use crate::error::EngineError;
use crate::llm::{split_thinking, GenerationRequest};
use crate::prompts;
use crate::state::ConversationState;

pub async fn reply(
    state: &ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerOutput, EngineError> {
    require_user_message(state)?;
    let current = state.current_version();
    let assembled = assemble_for(state, &ctx, current.map(|v| v.content.as_str()));
    if assembled.exceeds_hard_limit() {
        return Ok(HandlerOutput::too_large());
    }

    let mut prompt_version = current.cloned();
    if let (Some(version), Some(content)) = (prompt_version.as_mut(), &assembled.artifact_content) {
        version.content.clone_from(content);
    }
    let response = ctx
        .generate(GenerationRequest::new(
            "reply",
            prompts::DEFAULT_SYSTEM,
            prompts::reply_prompt(
                prompt_version.as_ref(),
                &assembled.transcript,
                assembled.reflections.as_deref(),
            ),
        ))
        .await?;

    let (reasoning, visible) = split_thinking(&response);
    Ok(HandlerOutput::reply(Message::assistant(visible)).with_reasoning(reasoning))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::handlers::testing::ScriptedClient;
    use crate::store::kv::KvStore;

    #[tokio::test]
    async fn reply_produces_message_only() {
        let (kv, config) = (KvStore::memory(), EngineConfig::default());
        let client = ScriptedClient::replying(&["Sure, happy to explain."]);
        let ctx = HandlerContext { client: &client, search: None, kv: &kv, config: &config };
        let state = ConversationState {
            messages: vec![Message::user("what is a monad?")],
            ..Default::default()
        };

        let output = reply(&state, ctx).await.expect("reply should succeed");
        assert!(output.new_version.is_none());
        assert_eq!(output.reply.expect("reply expected").text(), "Sure, happy to explain.");
        assert!(client.last_prompt().contains(prompts::NO_ARTIFACT));
    }
}
