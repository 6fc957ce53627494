// Operation routing.
//
// `route` is a pure priority walk over the command flags; the optional
// intent refinement runs afterwards and may only narrow the two fallback
// routes to a plain reply.

use canvas_common::command::{CommandFlags, OperationTag};
use tracing::{debug, warn};

use crate::llm::{GenerationClient, GenerationRequest};
use crate::prompts;
use crate::state::ConversationState;

/// Pick the single operation for a turn. First match wins:
///
/// 1. code highlight → [`OperationTag::RangeRewriteCode`]
/// 2. text highlight → [`OperationTag::RangeRewriteMarkdown`]
/// 3. text theme flag → [`OperationTag::ThemeTransform`]
/// 4. code theme flag → [`OperationTag::CodeThemeTransform`]
/// 5. custom action id → [`OperationTag::CustomAction`]
/// 6. search enabled → [`OperationTag::SearchAugmented`]
/// 7. artifact exists → [`OperationTag::FullRewrite`]
/// 8. otherwise → [`OperationTag::Generate`]
pub fn route_flags(flags: &CommandFlags, has_artifact: bool) -> OperationTag {
    if flags.highlighted_code.is_some() {
        OperationTag::RangeRewriteCode
    } else if flags.highlighted_text.is_some() {
        OperationTag::RangeRewriteMarkdown
    } else if flags.has_text_theme() {
        OperationTag::ThemeTransform
    } else if flags.has_code_theme() {
        OperationTag::CodeThemeTransform
    } else if flags.custom_quick_action_id.is_some() {
        OperationTag::CustomAction
    } else if flags.web_search_enabled {
        OperationTag::SearchAugmented
    } else if has_artifact {
        OperationTag::FullRewrite
    } else {
        OperationTag::Generate
    }
}

pub fn route(state: &ConversationState) -> OperationTag {
    route_flags(&state.flags, state.has_artifact())
}

/// Whether the caller should ask for intent refinement on this tag.
pub fn is_fallback_route(tag: OperationTag) -> bool {
    matches!(tag, OperationTag::FullRewrite | OperationTag::Generate)
}

/// Ask the generation service whether the latest message only wants a
/// conversational answer. Any failure keeps the deterministic route.
pub async fn refine_with_intent(
    tag: OperationTag,
    state: &ConversationState,
    client: &dyn GenerationClient,
) -> OperationTag {
    if !is_fallback_route(tag) {
        return tag;
    }
    let Some(latest) = state.last_user_message() else {
        return tag;
    };

    let request = GenerationRequest::new(
        "route",
        prompts::ROUTE_SYSTEM,
        prompts::route_prompt(&latest.text(), state.current_version()),
    );
    match client.invoke(request).await {
        Ok(verdict) => match parse_verdict(&verdict) {
            Some(Verdict::Reply) => OperationTag::ReplyOnly,
            Some(Verdict::Artifact) => tag,
            None => {
                debug!(verdict = %verdict.trim(), "unrecognized routing verdict; keeping route");
                tag
            }
        },
        Err(error) => {
            warn!(error = %error, route = %tag, "intent classification failed; keeping route");
            tag
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Reply,
    Artifact,
}

fn parse_verdict(raw: &str) -> Option<Verdict> {
    let word = raw
        .trim()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_ascii_lowercase();
    match word.as_str() {
        "reply" | "replytogeneralinput" => Some(Verdict::Reply),
        "artifact" | "rewrite" | "generate" | "rewriteartifact" | "generateartifact" => {
            Some(Verdict::Artifact)
        }
        _ => None,
    }
}
