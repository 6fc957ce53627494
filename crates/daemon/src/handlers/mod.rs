// Operation handlers. One per `OperationTag`, dispatched exhaustively.

pub mod custom_action;
pub mod generate;
pub mod highlight;
pub mod reply;
pub mod rewrite;
pub mod search;
pub mod theme;

use canvas_common::command::OperationTag;
use canvas_common::types::{ArtifactDraft, Message};
use tracing::{debug, info_span, Instrument};

use crate::config::EngineConfig;
use crate::context::{self, Assembled, Budget, TOO_LARGE_REPLY};
use crate::error::EngineError;
use crate::llm::{self, GenerationClient, GenerationRequest};
use crate::search::SearchProvider;
use crate::state::ConversationState;
use crate::store::kv::KvStore;

/// Collaborators a handler may call.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub client: &'a dyn GenerationClient,
    pub search: Option<&'a dyn SearchProvider>,
    pub kv: &'a KvStore,
    pub config: &'a EngineConfig,
}

impl HandlerContext<'_> {
    /// Stream one completion under the configured deadline.
    pub async fn generate(&self, request: GenerationRequest) -> Result<String, EngineError> {
        llm::generate_text(self.client, request, self.config.generation.timeout())
            .await
            .map_err(EngineError::from)
    }

    pub fn budget(&self) -> Budget {
        Budget::for_handlers(&self.config.context)
    }
}

/// What a finished handler wants persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    pub new_version: Option<ArtifactDraft>,
    pub reply: Option<Message>,
    /// Messages recorded in the log but hidden from the conversation UI.
    pub hidden_messages: Vec<Message>,
    /// Set when `reply` is the oversize substitution; post-processing then
    /// makes no generation calls.
    pub oversize: bool,
}

impl HandlerOutput {
    pub fn version(draft: ArtifactDraft) -> Self {
        Self { new_version: Some(draft), ..Self::default() }
    }

    pub fn reply(message: Message) -> Self {
        Self { reply: Some(message), ..Self::default() }
    }

    /// The fixed answer used instead of calling generation on oversize input.
    pub fn too_large() -> Self {
        Self { oversize: true, ..Self::reply(Message::assistant(TOO_LARGE_REPLY)) }
    }

    /// Record a reasoning block split off the response.
    fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        if let Some(reasoning) = reasoning {
            self.hidden_messages.push(Message::assistant(reasoning).hidden());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.new_version.is_none() && self.reply.is_none() && self.hidden_messages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerStep {
    Done(HandlerOutput),
    /// Hand the turn to another operation after adjusting the state.
    Continue(OperationTag),
}

pub async fn dispatch(
    tag: OperationTag,
    state: &mut ConversationState,
    ctx: HandlerContext<'_>,
) -> Result<HandlerStep, EngineError> {
    let span = info_span!("handler", operation = %tag, thread_id = %state.thread_id);
    async move {
        debug!("running handler");
        let output = match tag {
            OperationTag::RangeRewriteCode => highlight::rewrite_code(state, ctx).await?,
            OperationTag::RangeRewriteMarkdown => highlight::rewrite_markdown(state, ctx).await?,
            OperationTag::ThemeTransform => theme::rewrite_text_theme(state, ctx).await?,
            OperationTag::CodeThemeTransform => theme::rewrite_code_theme(state, ctx).await?,
            OperationTag::CustomAction => custom_action::run(state, ctx).await?,
            OperationTag::SearchAugmented => return search::augment(state, ctx).await,
            OperationTag::FullRewrite => rewrite::rewrite_artifact(state, ctx).await?,
            OperationTag::Generate => generate::generate_artifact(state, ctx).await?,
            OperationTag::ReplyOnly => reply::reply(state, ctx).await?,
        };
        Ok(HandlerStep::Done(output))
    }
    .instrument(span)
    .await
}

// ── Shared helpers ─────────────────────────────────────────────────

/// Assemble the conversation context every transcript-based handler uses.
fn assemble_for(state: &ConversationState, ctx: &HandlerContext<'_>, artifact: Option<&str>) -> Assembled {
    let reflections = state.rendered_reflections();
    context::assemble(&state.messages, artifact, reflections.as_deref(), &ctx.budget())
}

fn require_user_message(state: &ConversationState) -> Result<&Message, EngineError> {
    state
        .last_user_message()
        .ok_or_else(|| EngineError::validation("no user message found in the conversation"))
}

/// Split a leading `<title>…</title>` line off a response.
pub fn extract_title(response: &str) -> (Option<String>, &str) {
    let trimmed = response.trim_start();
    let Some(rest) = trimmed.strip_prefix(crate::prompts::TITLE_TAG_OPEN) else {
        return (None, response);
    };
    let line_end = rest.find('\n').unwrap_or(rest.len());
    let Some(close) = rest[..line_end].find(crate::prompts::TITLE_TAG_CLOSE) else {
        return (None, response);
    };
    let title = rest[..close].trim();
    let body = rest[line_end..].trim_start_matches(['\r', '\n']);
    ((!title.is_empty()).then(|| title.to_owned()), body)
}

/// Split a response wrapped in one fenced code block into `(language, code)`.
pub fn strip_code_fence(response: &str) -> Option<(Option<String>, String)> {
    let trimmed = response.trim();
    let rest = trimmed.strip_prefix("```")?;
    let (info, body) = rest.split_once('\n')?;
    let body = body.strip_suffix("```")?;
    if body.contains("\n```") {
        return None;
    }
    let language = info.trim();
    let language = (!language.is_empty()).then(|| language.to_ascii_lowercase());
    Some((language, body.trim_end_matches(['\r', '\n']).to_owned()))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted generation client shared by handler tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures_util::stream;

    use crate::llm::{ChunkStream, GenerationClient, GenerationError, GenerationRequest, StreamChunk};

    #[derive(Default)]
    pub struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String, GenerationError>>>,
        pub requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedClient {
        pub fn with(responses: Vec<Result<String, GenerationError>>) -> Self {
            Self { responses: Mutex::new(responses.into()), requests: Mutex::default() }
        }

        pub fn replying(texts: &[&str]) -> Self {
            Self::with(texts.iter().map(|t| Ok((*t).to_owned())).collect())
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().expect("requests lock should not be poisoned").len()
        }

        pub fn last_prompt(&self) -> String {
            self.requests
                .lock()
                .expect("requests lock should not be poisoned")
                .last()
                .map(|r| r.prompt.clone())
                .unwrap_or_default()
        }
    }

    impl GenerationClient for ScriptedClient {
        fn stream(&self, request: GenerationRequest) -> ChunkStream {
            self.requests.lock().expect("requests lock should not be poisoned").push(request);
            let next = self
                .responses
                .lock()
                .expect("responses lock should not be poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Service("no scripted response".into())));
            let items = match next {
                Ok(text) => vec![Ok(StreamChunk::Text(text))],
                Err(error) => vec![Err(error)],
            };
            Box::pin(stream::iter(items))
        }
    }
}
