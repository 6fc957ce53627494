// Post-processing that runs after every successful handler: follow-up
// reply, reflection, state cleanup and the title/summarize/end fork.

use canvas_common::types::{Message, Reflection, Role};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, PipelineConfig};
use crate::context::{self, format_transcript, Budget, TOO_LARGE_REPLY};
use crate::error::EngineError;
use crate::handlers::strip_code_fence;
use crate::llm::{invoke_with_timeout, GenerationClient, GenerationError, GenerationRequest};
use crate::prompts;
use crate::state::ConversationState;
use crate::store::kv::KvStore;
use crate::store::ThreadStore;

pub const MEMORIES_NAMESPACE: &str = "memories";
pub const REFLECTION_KEY: &str = "reflection";
pub const THREAD_TITLE_KEY: &str = "thread_title";

/// Stands in for the follow-up when generation fails after the turn's
/// changes were already persisted.
pub const FOLLOW_UP_FALLBACK: &str =
    "Your changes are saved, but I couldn't write a follow-up message this time.";

pub fn memories_namespace(scope_id: &str) -> Vec<String> {
    vec![MEMORIES_NAMESPACE.to_owned(), scope_id.to_owned()]
}

// ── Follow-up ──────────────────────────────────────────────────────

/// Short closing message after a handler ran. Oversize input or an "input
/// too long" failure yields the fixed apology; any other generation failure
/// yields [`FOLLOW_UP_FALLBACK`]. Never fails the turn.
pub async fn follow_up(
    state: &ConversationState,
    client: &dyn GenerationClient,
    config: &EngineConfig,
) -> Message {
    let artifact = state.current_version().map(|v| v.content.as_str());
    let reflections = state.rendered_reflections();
    let assembled = context::assemble(
        &state.messages,
        artifact,
        reflections.as_deref(),
        &Budget::for_follow_up(&config.context),
    );
    if assembled.exceeds_hard_limit() {
        warn!(total_bytes = assembled.total_bytes, "follow-up context too large; using apology");
        return Message::assistant(TOO_LARGE_REPLY);
    }

    let request = GenerationRequest::new(
        "follow_up",
        prompts::DEFAULT_SYSTEM,
        prompts::follow_up_prompt(
            assembled.artifact_content.as_deref().unwrap_or_default(),
            &assembled.transcript,
            assembled.reflections.as_deref(),
        ),
    );
    match invoke_with_timeout(client, request, config.generation.timeout()).await {
        Ok(text) => Message::assistant(text.trim()),
        Err(GenerationError::InputTooLong) => {
            warn!("follow-up rejected as too long; using apology");
            Message::assistant(TOO_LARGE_REPLY)
        }
        Err(error) => {
            warn!(thread_id = %state.thread_id, error = %error, "follow-up generation failed");
            Message::assistant(FOLLOW_UP_FALLBACK)
        }
    }
}

// ── Reflection ─────────────────────────────────────────────────────

pub async fn load_reflection(kv: &KvStore, config: &PipelineConfig) -> Option<Reflection> {
    let scope = config.reflection_scope_id.as_deref()?;
    match kv.get_json::<Reflection>(&memories_namespace(scope), REFLECTION_KEY).await {
        Ok(found) => found,
        Err(error) => {
            warn!(scope, error = %error, "failed to load reflections");
            None
        }
    }
}

/// Pull the first JSON object out of a model response.
fn parse_reflection(response: &str) -> Option<Reflection> {
    let body = strip_code_fence(response).map_or_else(|| response.to_owned(), |(_, code)| code);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

/// Update stored reflections from the turn. Skipped without a configured
/// scope; any failure is logged and swallowed. Returns whether a
/// reflection was written.
pub async fn reflect(
    state: &ConversationState,
    kv: &KvStore,
    client: &dyn GenerationClient,
    config: &EngineConfig,
) -> bool {
    let Some(scope) = config.pipeline.reflection_scope_id.as_deref() else {
        debug!("no reflection scope configured; skipping reflection");
        return false;
    };

    let existing = state.rendered_reflections();
    let request = GenerationRequest::new(
        "reflect",
        prompts::REFLECTION_SYSTEM,
        prompts::reflection_prompt(
            existing.as_deref(),
            state.current_version().map(|v| v.content.as_str()),
            &format_transcript(&state.messages),
        ),
    );
    let response = match invoke_with_timeout(client, request, config.generation.timeout()).await {
        Ok(response) => response,
        Err(error) => {
            warn!(scope, error = %error, "reflection generation failed");
            return false;
        }
    };
    let Some(reflection) = parse_reflection(&response) else {
        warn!(scope, "reflection response was not valid JSON");
        return false;
    };
    let value = match serde_json::to_value(&reflection) {
        Ok(value) => value,
        Err(error) => {
            warn!(scope, error = %error, "failed to encode reflection");
            return false;
        }
    };
    match kv.put_item(&memories_namespace(scope), REFLECTION_KEY, value).await {
        Ok(_) => {
            info!(scope, rules = reflection.style_rules.len(), facts = reflection.content.len(), "stored reflection");
            true
        }
        Err(error) => {
            warn!(scope, error = %error, "failed to store reflection");
            false
        }
    }
}

// ── Cleanup and terminal fork ─────────────────────────────────────

/// Reset every transient flag so the next turn starts clean.
pub fn clean_state(state: &mut ConversationState) {
    state.flags.clear();
    state.next = None;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStep {
    GenerateTitle,
    Summarize,
    End,
}

pub fn transcript_chars(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.text().chars().count()).sum()
}

pub fn terminal_fork(state: &ConversationState, config: &PipelineConfig) -> TerminalStep {
    let first_exchange = state.user_message_count() == 1 && state.has_artifact();
    if first_exchange || state.messages.len() <= config.title_message_limit {
        TerminalStep::GenerateTitle
    } else if transcript_chars(&state.messages) > config.summarize_threshold_chars {
        TerminalStep::Summarize
    } else {
        TerminalStep::End
    }
}

fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let title = line.trim_matches(|c: char| c == '"' || c == '\'' || c == '`').trim();
    (!title.is_empty()).then(|| title.to_owned())
}

/// Generate and store `metadata.thread_title`. Failures are logged and
/// swallowed.
pub async fn generate_title(
    state: &ConversationState,
    threads: &ThreadStore,
    client: &dyn GenerationClient,
    config: &EngineConfig,
) -> Option<String> {
    let request = GenerationRequest::new(
        "title",
        prompts::TITLE_SYSTEM,
        prompts::title_prompt(
            &format_transcript(&state.messages),
            state.current_version().map(|v| v.content.as_str()),
        ),
    );
    let title = match invoke_with_timeout(client, request, config.generation.timeout()).await {
        Ok(raw) => clean_title(&raw)?,
        Err(error) => {
            warn!(thread_id = %state.thread_id, error = %error, "title generation failed");
            return None;
        }
    };

    let mut patch = serde_json::Map::new();
    patch.insert(THREAD_TITLE_KEY.to_owned(), title.clone().into());
    match threads.merge_metadata(state.thread_id, patch).await {
        Ok(_) => {
            info!(thread_id = %state.thread_id, title = %title, "stored thread title");
            Some(title)
        }
        Err(error) => {
            warn!(thread_id = %state.thread_id, error = %error, "failed to store thread title");
            None
        }
    }
}

/// Collapse the log into a hidden summary followed by the messages from the
/// latest user message onward.
pub async fn summarize(
    state: &ConversationState,
    client: &dyn GenerationClient,
    config: &EngineConfig,
) -> Result<Vec<Message>, EngineError> {
    let request = GenerationRequest::new(
        "summarize",
        prompts::SUMMARY_SYSTEM,
        prompts::summarize_prompt(&format_transcript(&state.messages)),
    );
    let summary = invoke_with_timeout(client, request, config.generation.timeout()).await?;

    let tail_start = state
        .messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .unwrap_or(state.messages.len());
    let mut messages = Vec::with_capacity(1 + state.messages.len() - tail_start);
    messages.push(
        Message::system(format!("{}{}", prompts::SUMMARY_MESSAGE_PREFIX, summary.trim())).hidden(),
    );
    messages.extend_from_slice(&state.messages[tail_start..]);
    info!(
        thread_id = %state.thread_id,
        before = state.messages.len(),
        after = messages.len(),
        "summarized conversation"
    );
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::ScriptedClient;
    use canvas_common::command::CommandFlags;
    use canvas_common::types::{Artifact, ArtifactKind, ArtifactVersion};

    fn artifact() -> Option<Artifact> {
        Some(Artifact {
            current_index: 1,
            versions: vec![ArtifactVersion {
                index: 1,
                kind: ArtifactKind::Text,
                title: None,
                language: None,
                content: "doc".into(),
            }],
        })
    }

    fn conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| if i % 2 == 0 { Message::user(format!("u{i}")) } else { Message::assistant(format!("a{i}")) })
            .collect()
    }

    #[test]
    fn fork_prefers_title_then_summary_then_end() {
        let config = PipelineConfig { summarize_threshold_chars: 20, ..PipelineConfig::default() };

        let first = ConversationState { messages: conversation(2), artifact: artifact(), ..Default::default() };
        assert_eq!(terminal_fork(&first, &config), TerminalStep::GenerateTitle);

        let short = ConversationState { messages: conversation(4), ..Default::default() };
        assert_eq!(terminal_fork(&short, &config), TerminalStep::GenerateTitle);

        let long = ConversationState { messages: conversation(12), ..Default::default() };
        assert_eq!(terminal_fork(&long, &config), TerminalStep::Summarize);

        let relaxed = PipelineConfig::default();
        assert_eq!(terminal_fork(&long, &relaxed), TerminalStep::End);
    }

    #[test]
    fn clean_state_resets_every_flag() {
        let mut state = ConversationState {
            flags: CommandFlags {
                language: Some("german".into()),
                fix_bugs: true,
                web_search_enabled: true,
                ..Default::default()
            },
            next: Some(canvas_common::command::OperationTag::Generate),
            ..Default::default()
        };
        clean_state(&mut state);
        assert!(state.flags.is_empty());
        assert!(state.next.is_none());
    }

    #[tokio::test]
    async fn follow_up_substitutes_apology_for_input_too_long() {
        let client = ScriptedClient::with(vec![Err(GenerationError::InputTooLong)]);
        let state = ConversationState { messages: conversation(1), artifact: artifact(), ..Default::default() };
        let message = follow_up(&state, &client, &EngineConfig::default()).await;
        assert_eq!(message.text(), TOO_LARGE_REPLY);
    }

    #[tokio::test]
    async fn follow_up_failure_yields_fallback_message() {
        let client = ScriptedClient::with(vec![Err(GenerationError::Service("overloaded".into()))]);
        let state = ConversationState { messages: conversation(1), artifact: artifact(), ..Default::default() };
        let message = follow_up(&state, &client, &EngineConfig::default()).await;
        assert_eq!(message.text(), FOLLOW_UP_FALLBACK);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn follow_up_skips_generation_when_oversized() {
        let client = ScriptedClient::replying(&["unused"]);
        let mut config = EngineConfig::default();
        config.context.budget_bytes = 100;
        let mut state = ConversationState { messages: conversation(1), artifact: artifact(), ..Default::default() };
        if let Some(artifact) = state.artifact.as_mut() {
            artifact.versions[0].content = "x".repeat(200);
        }
        let message = follow_up(&state, &client, &config).await;
        assert_eq!(message.text(), TOO_LARGE_REPLY);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn reflection_is_skipped_without_scope_and_stored_with_one() {
        let kv = KvStore::memory();
        let state = ConversationState { messages: conversation(1), ..Default::default() };

        let client = ScriptedClient::replying(&["unused"]);
        assert!(!reflect(&state, &kv, &client, &EngineConfig::default()).await);
        assert_eq!(client.calls(), 0);

        let mut config = EngineConfig::default();
        config.pipeline.reflection_scope_id = Some("assistant-1".into());
        let client = ScriptedClient::replying(&[
            "```json\n{\"styleRules\": [\"be brief\"], \"content\": [\"writes rust\"]}\n```",
        ]);
        assert!(reflect(&state, &kv, &client, &config).await);
        let stored = load_reflection(&kv, &config.pipeline).await.expect("reflection stored");
        assert_eq!(stored.style_rules, vec!["be brief".to_owned()]);

        let client = ScriptedClient::replying(&["not json"]);
        assert!(!reflect(&state, &kv, &client, &config).await);
    }

    #[tokio::test]
    async fn title_failures_are_swallowed() {
        let threads = ThreadStore::memory();
        let thread = threads.create_thread(serde_json::Map::new()).await.expect("thread created");
        let state = ConversationState { thread_id: thread.id, messages: conversation(2), ..Default::default() };

        let client = ScriptedClient::with(vec![Err(GenerationError::Service("down".into()))]);
        assert!(generate_title(&state, &threads, &client, &EngineConfig::default()).await.is_none());

        let client = ScriptedClient::replying(&["\"Rust Poems\"\n"]);
        let title = generate_title(&state, &threads, &client, &EngineConfig::default()).await;
        assert_eq!(title.as_deref(), Some("Rust Poems"));
        let stored = threads.get_thread(thread.id).await.expect("thread exists");
        assert_eq!(stored.title(), Some("Rust Poems"));
    }

    #[tokio::test]
    async fn summary_keeps_messages_from_latest_user_message() {
        let client = ScriptedClient::replying(&["they wrote a poem"]);
        let mut messages = conversation(5);
        messages.push(Message::assistant("reply"));
        let state = ConversationState { messages, ..Default::default() };

        let summarized = summarize(&state, &client, &EngineConfig::default())
            .await
            .expect("summarize should succeed");
        assert_eq!(summarized.len(), 3);
        assert!(summarized[0].is_hidden());
        assert!(summarized[0].text().ends_with("they wrote a poem"));
        assert_eq!(summarized[1].text(), "u4");
        assert_eq!(summarized[2].text(), "reply");
    }
}
