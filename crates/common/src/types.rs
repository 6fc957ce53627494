// Core domain types shared across all canvas crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Extra-field key marking a message the UI should not render.
pub const HIDDEN_EXTRA_KEY: &str = "hidden";

// ── Threads ────────────────────────────────────────────────────────

/// A persisted conversation plus its current artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    #[serde(rename = "thread_id")]
    pub id: Uuid,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(metadata: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self { id: Uuid::new_v4(), metadata, created_at: now, updated_at: now }
    }

    /// Title stored by the title-generation step, if any.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("thread_title").and_then(Value::as_str)
    }
}

// ── Messages ───────────────────────────────────────────────────────

/// Message author. Parsing is lenient, see [`Role::normalize`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    /// Normalize stored role spellings. Legacy `human`/`ai` map onto
    /// `user`/`assistant`; anything unrecognized is treated as `user`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "assistant" | "ai" => Self::Assistant,
            "system" => Self::System,
            "tool" => Self::Tool,
            _ => Self::User,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self::normalize(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_owned()
    }
}

/// One element of a structured message payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentFragment {
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ContentFragment {
    pub fn text(text: impl Into<String>) -> Self {
        let mut rest = Map::new();
        rest.insert("type".into(), Value::String("text".into()));
        Self { text: text.into(), rest }
    }
}

/// Message body: plain text or an ordered list of fragments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Fragments(Vec<ContentFragment>),
}

impl MessageContent {
    /// Flatten to one string, preserving fragment order.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Fragments(fragments) => fragments.iter().map(|f| f.text.as_str()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Fragments(fragments) => fragments.iter().map(|f| f.text.len()).sum(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A single conversation message. Ordinals are assigned by the store from
/// the message's position in the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default)]
    pub ordinal: usize,
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self { ordinal: 0, role, content: content.into(), extra: Map::new() }
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    /// Mark the message as hidden from the conversation UI.
    pub fn hidden(mut self) -> Self {
        self.extra.insert(HIDDEN_EXTRA_KEY.into(), Value::Bool(true));
        self
    }

    pub fn is_hidden(&self) -> bool {
        self.extra.get(HIDDEN_EXTRA_KEY).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn text(&self) -> String {
        self.content.to_text()
    }
}

// ── Artifacts ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Text,
    Code,
}

impl ArtifactKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "code" => Some(Self::Code),
            _ => None,
        }
    }
}

/// One immutable snapshot of the artifact's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactVersion {
    /// 1-based, contiguous per thread.
    pub index: u32,
    pub kind: ArtifactKind,
    pub title: Option<String>,
    /// Programming language; only meaningful for code versions.
    pub language: Option<String>,
    pub content: String,
}

/// Content for a version that has not been assigned an index yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactDraft {
    pub kind: ArtifactKind,
    pub title: Option<String>,
    pub language: Option<String>,
    pub content: String,
}

impl ArtifactDraft {
    pub fn text(title: Option<String>, content: impl Into<String>) -> Self {
        Self { kind: ArtifactKind::Text, title, language: None, content: content.into() }
    }

    pub fn code(
        title: Option<String>,
        language: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Self { kind: ArtifactKind::Code, title, language, content: content.into() }
    }

    /// A draft carrying `previous`'s kind, title and language with new content.
    pub fn revise(previous: &ArtifactVersion, content: impl Into<String>) -> Self {
        Self {
            kind: previous.kind,
            title: previous.title.clone(),
            language: previous.language.clone(),
            content: content.into(),
        }
    }

    pub fn into_version(self, index: u32) -> ArtifactVersion {
        let language = match self.kind {
            ArtifactKind::Code => self.language,
            ArtifactKind::Text => None,
        };
        ArtifactVersion { index, kind: self.kind, title: self.title, language, content: self.content }
    }
}

/// The versioned document a thread is producing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub current_index: u32,
    pub versions: Vec<ArtifactVersion>,
}

impl Artifact {
    pub fn current(&self) -> Option<&ArtifactVersion> {
        self.version(self.current_index)
    }

    pub fn version(&self, index: u32) -> Option<&ArtifactVersion> {
        self.versions.iter().find(|version| version.index == index)
    }

    pub fn latest(&self) -> Option<&ArtifactVersion> {
        self.versions.iter().max_by_key(|version| version.index)
    }

    pub fn max_index(&self) -> u32 {
        self.versions.iter().map(|version| version.index).max().unwrap_or(0)
    }

    pub fn metadata(&self) -> ArtifactVersionMeta {
        let mut version_indices: Vec<u32> = self.versions.iter().map(|v| v.index).collect();
        version_indices.sort_unstable();
        ArtifactVersionMeta {
            total_versions: version_indices.len(),
            version_indices,
            current_index: self.current_index,
        }
    }
}

/// Version listing without content payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactVersionMeta {
    pub version_indices: Vec<u32>,
    pub current_index: u32,
    pub total_versions: usize,
}

// ── Reflections ────────────────────────────────────────────────────

/// Accumulated style and preference notes about a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    #[serde(default)]
    pub style_rules: Vec<String>,
    #[serde(default)]
    pub content: Vec<String>,
}

impl Reflection {
    pub fn is_empty(&self) -> bool {
        self.style_rules.is_empty() && self.content.is_empty()
    }

    /// Render as the bullet-list block used in generation prompts.
    pub fn render(&self) -> String {
        let bullets = |items: &[String]| {
            if items.is_empty() {
                "- none".to_owned()
            } else {
                items.iter().map(|item| format!("- {item}")).collect::<Vec<_>>().join("\n")
            }
        };
        format!(
            "Style guidelines:\n{}\n\nKey content to remember:\n{}",
            bullets(&self.style_rules),
            bullets(&self.content)
        )
    }
}

// ── Custom actions ─────────────────────────────────────────────────

/// A user-defined quick action stored in the key-value store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomAction {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub include_reflections: bool,
    #[serde(default)]
    pub include_prefix: bool,
    #[serde(default)]
    pub include_recent_history: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_role_spellings_normalize() {
        assert_eq!(Role::normalize("human"), Role::User);
        assert_eq!(Role::normalize("AI"), Role::Assistant);
        assert_eq!(Role::normalize("tool"), Role::Tool);
        assert_eq!(Role::normalize("mystery"), Role::User);

        let role: Role = serde_json::from_value(json!("ai")).expect("legacy role should parse");
        assert_eq!(role, Role::Assistant);
        assert_eq!(serde_json::to_value(Role::User).expect("role should serialize"), json!("user"));
    }

    #[test]
    fn fragment_content_flattens_in_order() {
        let content: MessageContent = serde_json::from_value(json!([
            {"type": "text", "text": "alpha "},
            {"type": "text", "text": "beta"},
            {"type": "image_url", "image_url": "x"}
        ]))
        .expect("fragment list should parse");

        assert_eq!(content.to_text(), "alpha beta");
        assert_eq!(content.len(), 10);
    }

    #[test]
    fn hidden_flag_round_trips_through_extra() {
        let message = Message::assistant("thinking").hidden();
        assert!(message.is_hidden());
        assert!(!Message::user("hi").is_hidden());

        let value = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(value["extra"]["hidden"], json!(true));
    }

    #[test]
    fn text_draft_drops_language() {
        let draft = ArtifactDraft {
            kind: ArtifactKind::Text,
            title: Some("Notes".into()),
            language: Some("rust".into()),
            content: "body".into(),
        };
        let version = draft.into_version(3);
        assert_eq!(version.index, 3);
        assert_eq!(version.language, None);
    }

    #[test]
    fn artifact_metadata_lists_sorted_indices() {
        let artifact = Artifact {
            current_index: 2,
            versions: vec![
                ArtifactDraft::text(None, "B").into_version(2),
                ArtifactDraft::text(None, "A").into_version(1),
            ],
        };

        let meta = artifact.metadata();
        assert_eq!(meta.version_indices, vec![1, 2]);
        assert_eq!(meta.current_index, 2);
        assert_eq!(meta.total_versions, 2);
        assert_eq!(artifact.current().map(|v| v.content.as_str()), Some("B"));
        assert_eq!(artifact.max_index(), 2);
    }

    #[test]
    fn reflection_render_marks_empty_sections() {
        let reflection =
            Reflection { style_rules: vec!["Use British spelling".into()], content: vec![] };
        let rendered = reflection.render();
        assert!(rendered.contains("- Use British spelling"));
        assert!(rendered.contains("Key content to remember:\n- none"));
    }
}
