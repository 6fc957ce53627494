// Search-augmented turns: look the question up, record what was found, and
// hand over to the artifact operation.

use canvas_common::command::OperationTag;
use canvas_common::types::Message;
use tracing::{info, warn};

use super::{require_user_message, HandlerContext, HandlerStep};
use crate::error::EngineError;
use crate::search::{format_results, search_with_timeout, ProviderError};
use crate::state::ConversationState;

pub async fn augment(
    state: &mut ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerStep, EngineError> {
    let query = require_user_message(state)?.text();
    state.flags.web_search_enabled = false;
    let next = if state.has_artifact() { OperationTag::FullRewrite } else { OperationTag::Generate };

    let Some(provider) = ctx.search else {
        warn!("search requested but no search provider is configured");
        return Ok(HandlerStep::Continue(next));
    };

    let results = search_with_timeout(provider, &query, ctx.config.generation.timeout())
        .await
        .map_err(|error| match error {
            ProviderError::Timeout => EngineError::upstream("web search timed out", true),
            ProviderError::Failed(message) => {
                EngineError::upstream(format!("web search failed: {message}"), true)
            }
        })?;

    if results.is_empty() {
        info!(next = %next, "web search returned no results");
        return Ok(HandlerStep::Continue(next));
    }

    info!(results = results.len(), next = %next, "injecting web search results");
    state.messages.push(Message::assistant(format_results(&results)).hidden());
    Ok(HandlerStep::Continue(next))
}
