// Whole-artifact rewrite.

use canvas_common::types::{ArtifactDraft, ArtifactKind};
use tracing::info;

use super::{assemble_for, extract_title, require_user_message, strip_code_fence, HandlerContext, HandlerOutput};
use crate::error::EngineError;
use crate::llm::{split_thinking, GenerationRequest};
use crate::prompts;
use crate::state::ConversationState;

pub async fn rewrite_artifact(
    state: &ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerOutput, EngineError> {
    let current = state
        .current_version()
        .ok_or_else(|| EngineError::validation("cannot rewrite: the thread has no artifact"))?;
    require_user_message(state)?;

    let assembled = assemble_for(state, &ctx, Some(&current.content));
    if assembled.exceeds_hard_limit() {
        return Ok(HandlerOutput::too_large());
    }

    let mut prompt_version = current.clone();
    if let Some(content) = &assembled.artifact_content {
        prompt_version.content.clone_from(content);
    }
    let response = ctx
        .generate(GenerationRequest::new(
            "rewrite",
            prompts::DEFAULT_SYSTEM,
            prompts::rewrite_prompt(
                &prompt_version,
                &assembled.transcript,
                assembled.reflections.as_deref(),
            ),
        ))
        .await?;

    let (reasoning, visible) = split_thinking(&response);
    let (title, body) = extract_title(&visible);
    let content = match current.kind {
        ArtifactKind::Code => strip_code_fence(body).map_or_else(|| body.to_owned(), |(_, code)| code),
        ArtifactKind::Text => body.trim().to_owned(),
    };

    let mut draft = ArtifactDraft::revise(current, content);
    if title.is_some() {
        draft.title = title;
    }
    info!(from_index = current.index, retitled = draft.title != current.title, "rewrote artifact");
    Ok(HandlerOutput::version(draft).with_reasoning(reasoning))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::handlers::testing::ScriptedClient;
    use crate::store::kv::KvStore;
    use canvas_common::types::{Artifact, ArtifactVersion, Message};

    fn state_with(kind: ArtifactKind, content: &str) -> ConversationState {
        ConversationState {
            messages: vec![Message::user("make it better")],
            artifact: Some(Artifact {
                current_index: 1,
                versions: vec![ArtifactVersion {
                    index: 1,
                    kind,
                    title: Some("Draft".into()),
                    language: (kind == ArtifactKind::Code).then(|| "rust".to_owned()),
                    content: content.into(),
                }],
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn title_carries_forward_unless_supplied() {
        let (kv, config) = (KvStore::memory(), EngineConfig::default());

        let client = ScriptedClient::replying(&["B"]);
        let ctx = HandlerContext { client: &client, search: None, kv: &kv, config: &config };
        let output = rewrite_artifact(&state_with(ArtifactKind::Text, "A"), ctx)
            .await
            .expect("rewrite should succeed");
        let draft = output.new_version.expect("version expected");
        assert_eq!(draft.content, "B");
        assert_eq!(draft.title.as_deref(), Some("Draft"));

        let client = ScriptedClient::replying(&["<title>Final</title>\nC"]);
        let ctx = HandlerContext { client: &client, search: None, kv: &kv, config: &config };
        let output = rewrite_artifact(&state_with(ArtifactKind::Text, "A"), ctx)
            .await
            .expect("rewrite should succeed");
        assert_eq!(output.new_version.expect("version expected").title.as_deref(), Some("Final"));
    }

    #[tokio::test]
    async fn code_keeps_kind_and_language() {
        let (kv, config) = (KvStore::memory(), EngineConfig::default());
        let client = ScriptedClient::replying(&["```rust\nfn b() {}\n```"]);
        let ctx = HandlerContext { client: &client, search: None, kv: &kv, config: &config };
        let output = rewrite_artifact(&state_with(ArtifactKind::Code, "fn a() {}"), ctx)
            .await
            .expect("rewrite should succeed");
        let draft = output.new_version.expect("version expected");
        assert_eq!(draft.kind, ArtifactKind::Code);
        assert_eq!(draft.language.as_deref(), Some("rust"));
        assert_eq!(draft.content, "fn b() {}");
    }

    #[tokio::test]
    async fn missing_artifact_is_a_validation_error() {
        let (kv, config) = (KvStore::memory(), EngineConfig::default());
        let client = ScriptedClient::replying(&["unused"]);
        let ctx = HandlerContext { client: &client, search: None, kv: &kv, config: &config };
        let state = ConversationState { messages: vec![Message::user("edit")], ..Default::default() };
        let error = rewrite_artifact(&state, ctx).await.expect_err("rewrite should fail");
        assert!(matches!(error, EngineError::Validation(_)));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_context_substitutes_fixed_reply() {
        let (kv, mut config) = (KvStore::memory(), EngineConfig::default());
        config.context.budget_bytes = 100;
        config.context.handler_reserve_bytes = 10;
        config.context.handler_degrade_floor_bytes = 0;
        let client = ScriptedClient::replying(&["unused"]);
        let ctx = HandlerContext { client: &client, search: None, kv: &kv, config: &config };
        let output = rewrite_artifact(&state_with(ArtifactKind::Text, &"z".repeat(110)), ctx)
            .await
            .expect("oversize should not fail the turn");
        assert!(output.new_version.is_none());
        assert_eq!(
            output.reply.expect("reply expected").text(),
            crate::context::TOO_LARGE_REPLY
        );
        assert_eq!(client.calls(), 0);
    }
}
