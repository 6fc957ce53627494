// Turn orchestration: load, enrich, route, handle, persist, post-process.

use std::sync::Arc;

use canvas_common::command::{CommandFlags, OperationTag};
use canvas_common::types::{Artifact, ArtifactVersion, Message, Role};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::handlers::{self, HandlerContext, HandlerOutput, HandlerStep};
use crate::llm::GenerationClient;
use crate::pipeline::{self, TerminalStep};
use crate::router;
use crate::search::{enrich_message, ScrapeProvider, SearchProvider};
use crate::sharing::{share_with_retry, RunSharing};
use crate::state::ConversationState;
use crate::store::Stores;

/// New input for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Messages to append before routing, usually one user message.
    pub messages: Vec<Message>,
    #[serde(default)]
    pub flags: CommandFlags,
    /// Owner of custom quick actions.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl TurnRequest {
    pub fn user(text: impl Into<String>) -> Self {
        Self { messages: vec![Message::user(text.into())], ..Self::default() }
    }

    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub operation: OperationTag,
    pub version: Option<ArtifactVersion>,
    pub reply: Option<Message>,
    pub terminal: TerminalStep,
    pub title: Option<String>,
}

pub struct Engine {
    stores: Stores,
    client: Arc<dyn GenerationClient>,
    search: Option<Arc<dyn SearchProvider>>,
    scraper: Option<Arc<dyn ScrapeProvider>>,
    sharing: Option<Arc<dyn RunSharing>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(stores: Stores, client: Arc<dyn GenerationClient>, config: EngineConfig) -> Self {
        Self { stores, client, search: None, scraper: None, sharing: None, config }
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_scraper(mut self, scraper: Arc<dyn ScrapeProvider>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    pub fn with_sharing(mut self, sharing: Arc<dyn RunSharing>) -> Self {
        self.sharing = Some(sharing);
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn handler_context(&self) -> HandlerContext<'_> {
        HandlerContext {
            client: self.client.as_ref(),
            search: self.search.as_deref(),
            kv: &self.stores.kv,
            config: &self.config,
        }
    }

    /// Run one conversation turn against `thread_id`, creating the thread
    /// on first use.
    pub async fn run_turn(
        &self,
        thread_id: Uuid,
        request: TurnRequest,
    ) -> Result<TurnOutcome, EngineError> {
        let span = info_span!("turn", thread_id = %thread_id);
        self.run_turn_inner(thread_id, request).instrument(span).await
    }

    async fn run_turn_inner(
        &self,
        thread_id: Uuid,
        request: TurnRequest,
    ) -> Result<TurnOutcome, EngineError> {
        if request.messages.is_empty() {
            return Err(EngineError::validation("a turn needs at least one new message"));
        }
        let threads = &self.stores.threads;

        threads.get_or_create_thread(thread_id).await?;
        let mut messages = threads.get_messages(thread_id).await?;
        let artifact = threads.get_artifact(thread_id).await?;

        let mut incoming = request.messages;
        if let Some(scraper) = &self.scraper {
            if let Some(latest) = incoming.iter_mut().rev().find(|m| m.role == Role::User) {
                let pages =
                    enrich_message(latest, scraper.as_ref(), self.config.generation.timeout()).await;
                debug!(pages, "enriched message with scraped pages");
            }
        }
        messages.extend(incoming);

        let mut state = ConversationState {
            thread_id,
            user_id: request.user_id,
            messages,
            artifact,
            flags: request.flags,
            next: None,
            reflections: pipeline::load_reflection(&self.stores.kv, &self.config.pipeline).await,
        };

        let mut operation = router::route(&state);
        if self.config.pipeline.intent_classification {
            operation = router::refine_with_intent(operation, &state, self.client.as_ref()).await;
        }
        state.next = Some(operation);
        info!(operation = %operation, messages = state.messages.len(), "routed turn");

        let output = self.run_handlers(&mut operation, &mut state).await?;
        let oversize = output.oversize;

        // Persist: version first, then the message log.
        let version = match output.new_version {
            Some(draft) => {
                let version = threads.append_version(thread_id, draft).await?;
                record_version(&mut state.artifact, version.clone());
                info!(index = version.index, "appended artifact version");
                Some(version)
            }
            None => None,
        };
        state.messages.extend(output.hidden_messages);
        let mut reply = output.reply;
        if let Some(message) = &reply {
            state.messages.push(message.clone());
        }
        threads.replace_messages(thread_id, state.messages.clone()).await?;

        // Post-processing.
        if oversize {
            debug!("oversize input; skipping follow-up and reflection");
        } else {
            let follow_up = pipeline::follow_up(&state, self.client.as_ref(), &self.config).await;
            state.messages.push(follow_up.clone());
            threads.replace_messages(thread_id, state.messages.clone()).await?;
            reply = Some(follow_up);

            pipeline::reflect(&state, &self.stores.kv, self.client.as_ref(), &self.config).await;
        }
        pipeline::clean_state(&mut state);

        let terminal = pipeline::terminal_fork(&state, &self.config.pipeline);
        let mut title = None;
        match terminal {
            TerminalStep::GenerateTitle => {
                title = pipeline::generate_title(&state, threads, self.client.as_ref(), &self.config)
                    .await;
            }
            TerminalStep::Summarize => {
                let summarized =
                    pipeline::summarize(&state, self.client.as_ref(), &self.config).await?;
                threads.replace_messages(thread_id, summarized).await?;
            }
            TerminalStep::End => {}
        }

        info!(operation = %operation, terminal = ?terminal, "turn complete");
        Ok(TurnOutcome { operation, version, reply, terminal, title })
    }

    /// Dispatch `operation`, following at most one search hand-off.
    async fn run_handlers(
        &self,
        operation: &mut OperationTag,
        state: &mut ConversationState,
    ) -> Result<HandlerOutput, EngineError> {
        let mut handed_off = false;
        loop {
            match handlers::dispatch(*operation, state, self.handler_context()).await? {
                HandlerStep::Done(output) => return Ok(output),
                HandlerStep::Continue(next)
                    if !handed_off && *operation == OperationTag::SearchAugmented =>
                {
                    debug!(from = %operation, to = %next, "handing off operation");
                    handed_off = true;
                    *operation = next;
                    state.next = Some(next);
                }
                HandlerStep::Continue(next) => {
                    warn!(from = %operation, to = %next, "refusing a second operation hand-off");
                    return Err(EngineError::Routing);
                }
            }
        }
    }

    /// Publish a run through the configured sharing integration.
    pub async fn share_run(&self, run_id: &str) -> Result<String, EngineError> {
        let sharing = self
            .sharing
            .as_deref()
            .ok_or_else(|| EngineError::validation("run sharing is not configured"))?;
        share_with_retry(sharing, run_id, &self.config.sharing).await
    }
}

fn record_version(artifact: &mut Option<Artifact>, version: ArtifactVersion) {
    match artifact {
        Some(existing) => {
            existing.current_index = version.index;
            existing.versions.push(version);
        }
        None => {
            *artifact = Some(Artifact { current_index: version.index, versions: vec![version] });
        }
    }
}
