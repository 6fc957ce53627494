// Thread endpoint payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::{Artifact, ArtifactKind, ArtifactVersion, Message, Thread};

pub const DEFAULT_SEARCH_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Full thread view: metadata plus current values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadState {
    pub thread_id: Uuid,
    pub metadata: Map<String, Value>,
    pub values: ThreadValues,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ThreadState {
    pub fn new(thread: Thread, messages: Vec<Message>, artifact: Option<Artifact>) -> Self {
        Self {
            thread_id: thread.id,
            metadata: thread.metadata,
            values: ThreadValues { messages, artifact: artifact.map(ArtifactPayload::from) },
            created_at: thread.created_at,
            updated_at: thread.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThreadValues {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchThreadsRequest {
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Default for SearchThreadsRequest {
    fn default() -> Self {
        Self { limit: DEFAULT_SEARCH_LIMIT, metadata: Map::new() }
    }
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

/// Partial state update. Each field has its own merge rule, applied by the
/// store: metadata shallow-merges, messages replace, artifact versions append.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateStateRequest {
    #[serde(default)]
    pub values: Option<ValuesPatch>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValuesPatch {
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub artifact: Option<ArtifactPayload>,
    /// Any other key; rejected by the store.
    #[serde(flatten)]
    pub unknown: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactQuery {
    pub version: Option<u32>,
}

// ── Artifact wire form ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactPayload {
    #[serde(rename = "currentIndex")]
    pub current_index: u32,
    pub contents: Vec<VersionPayload>,
}

/// One version on the wire; the content field name depends on the kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VersionPayload {
    Text {
        index: u32,
        #[serde(default)]
        title: Option<String>,
        #[serde(rename = "fullMarkdown")]
        full_markdown: String,
    },
    Code {
        index: u32,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        language: Option<String>,
        code: String,
    },
}

impl From<ArtifactVersion> for VersionPayload {
    fn from(version: ArtifactVersion) -> Self {
        match version.kind {
            ArtifactKind::Text => Self::Text {
                index: version.index,
                title: version.title,
                full_markdown: version.content,
            },
            ArtifactKind::Code => Self::Code {
                index: version.index,
                title: version.title,
                language: version.language,
                code: version.content,
            },
        }
    }
}

impl From<VersionPayload> for ArtifactVersion {
    fn from(payload: VersionPayload) -> Self {
        match payload {
            VersionPayload::Text { index, title, full_markdown } => ArtifactVersion {
                index,
                kind: ArtifactKind::Text,
                title,
                language: None,
                content: full_markdown,
            },
            VersionPayload::Code { index, title, language, code } => {
                ArtifactVersion { index, kind: ArtifactKind::Code, title, language, content: code }
            }
        }
    }
}

impl From<Artifact> for ArtifactPayload {
    fn from(artifact: Artifact) -> Self {
        Self {
            current_index: artifact.current_index,
            contents: artifact.versions.into_iter().map(VersionPayload::from).collect(),
        }
    }
}

impl From<ArtifactPayload> for Artifact {
    fn from(payload: ArtifactPayload) -> Self {
        Self {
            current_index: payload.current_index,
            versions: payload.contents.into_iter().map(ArtifactVersion::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn artifact_payload_uses_kind_specific_content_fields() {
        let payload: ArtifactPayload = serde_json::from_value(json!({
            "currentIndex": 2,
            "contents": [
                {"index": 1, "type": "text", "title": "Essay", "fullMarkdown": "# A"},
                {"index": 2, "type": "code", "title": "Port", "language": "rust", "code": "fn a() {}"}
            ]
        }))
        .expect("artifact payload should parse");

        let artifact = Artifact::from(payload.clone());
        assert_eq!(artifact.current_index, 2);
        assert_eq!(artifact.versions[0].kind, ArtifactKind::Text);
        assert_eq!(artifact.versions[0].content, "# A");
        assert_eq!(artifact.versions[1].language.as_deref(), Some("rust"));
        assert_eq!(ArtifactPayload::from(artifact), payload);
    }

    #[test]
    fn values_patch_collects_unknown_keys() {
        let patch: ValuesPatch = serde_json::from_value(json!({
            "messages": [],
            "next": "generate"
        }))
        .expect("values patch should parse");

        assert_eq!(patch.messages, Some(vec![]));
        assert!(patch.unknown.contains_key("next"));
    }

    #[test]
    fn search_request_defaults_limit() {
        let request: SearchThreadsRequest =
            serde_json::from_value(json!({})).expect("empty search should parse");
        assert_eq!(request.limit, DEFAULT_SEARCH_LIMIT);
        assert!(request.metadata.is_empty());
    }
}
