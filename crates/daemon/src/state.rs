// Transient per-turn conversation state.

use canvas_common::command::{CommandFlags, OperationTag};
use canvas_common::types::{Artifact, ArtifactVersion, Message, Reflection, Role};
use uuid::Uuid;

/// Everything a handler may read or adjust while a turn is in flight.
/// Never persisted as a unit.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub thread_id: Uuid,
    pub user_id: Option<String>,
    pub messages: Vec<Message>,
    pub artifact: Option<Artifact>,
    pub flags: CommandFlags,
    pub next: Option<OperationTag>,
    pub reflections: Option<Reflection>,
}

impl ConversationState {
    pub fn has_artifact(&self) -> bool {
        self.current_version().is_some()
    }

    pub fn current_version(&self) -> Option<&ArtifactVersion> {
        self.artifact.as_ref().and_then(Artifact::current)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|message| message.role == Role::User)
    }

    pub fn user_message_count(&self) -> usize {
        self.messages.iter().filter(|message| message.role == Role::User).count()
    }

    /// Rendered reflections, or `None` when there is nothing to include.
    pub fn rendered_reflections(&self) -> Option<String> {
        self.reflections.as_ref().filter(|r| !r.is_empty()).map(Reflection::render)
    }
}
