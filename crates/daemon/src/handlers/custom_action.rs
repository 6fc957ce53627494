// User-defined quick actions loaded from the key-value store.

use std::collections::HashMap;

use canvas_common::types::{ArtifactDraft, CustomAction, Message};
use tracing::{debug, info};

use super::{HandlerContext, HandlerOutput};
use crate::error::EngineError;
use crate::llm::{split_thinking, GenerationRequest};
use crate::prompts;
use crate::state::ConversationState;

pub const ACTIONS_NAMESPACE: &str = "custom_actions";
pub const ACTIONS_KEY: &str = "actions";
pub const RECENT_HISTORY_LEN: usize = 5;

pub fn actions_namespace(user_id: &str) -> Vec<String> {
    vec![ACTIONS_NAMESPACE.to_owned(), user_id.to_owned()]
}

/// `<role>\ntext\n</role>` per message, oldest first.
fn recent_history(messages: &[Message]) -> String {
    let start = messages.len().saturating_sub(RECENT_HISTORY_LEN);
    messages[start..]
        .iter()
        .map(|m| format!("<{role}>\n{}\n</{role}>", m.text(), role = m.role.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn load_action(
    ctx: &HandlerContext<'_>,
    user_id: &str,
    action_id: &str,
) -> Result<CustomAction, EngineError> {
    let actions: HashMap<String, CustomAction> = ctx
        .kv
        .get_json(&actions_namespace(user_id), ACTIONS_KEY)
        .await?
        .unwrap_or_default();
    actions.get(action_id).cloned().ok_or_else(|| {
        EngineError::validation(format!("no custom quick action found with id `{action_id}`"))
    })
}

pub async fn run(
    state: &ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerOutput, EngineError> {
    let action_id = state
        .flags
        .custom_quick_action_id
        .as_deref()
        .ok_or_else(|| EngineError::validation("no custom quick action id was given"))?;
    let user_id = state
        .user_id
        .as_deref()
        .ok_or_else(|| EngineError::validation("custom quick actions require a user id"))?;
    let action = load_action(&ctx, user_id, action_id).await?;

    let Some(current) = state.current_version() else {
        debug!(action_id, "custom action without an artifact; nothing to do");
        return Ok(HandlerOutput::default());
    };

    let reflections = action.include_reflections.then(|| state.rendered_reflections()).flatten();
    let history = action.include_recent_history.then(|| recent_history(&state.messages));
    let prompt = prompts::custom_action_prompt(
        &action,
        reflections.as_deref(),
        history.as_deref(),
        &current.content,
    );

    let response = ctx
        .generate(GenerationRequest::new("custom_action", prompts::DEFAULT_SYSTEM, prompt))
        .await?;
    let (reasoning, visible) = split_thinking(&response);
    info!(action_id, from_index = current.index, "applied custom action");
    Ok(HandlerOutput::version(ArtifactDraft::revise(current, visible)).with_reasoning(reasoning))
}
