// Key-value store payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator used when a namespace is flattened into a single storage key.
pub const NAMESPACE_SEPARATOR: &str = "/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemKey {
    pub namespace: Vec<String>,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PutItemRequest {
    pub namespace: Vec<String>,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreItem {
    pub namespace: Vec<String>,
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemEnvelope {
    pub item: Option<StoreItem>,
}

/// A segment joins unambiguously only when it is non-empty and free of the
/// separator.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(NAMESPACE_SEPARATOR)
}

pub fn join_namespace(namespace: &[String]) -> String {
    namespace.join(NAMESPACE_SEPARATOR)
}

pub fn split_namespace(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(NAMESPACE_SEPARATOR).map(ToOwned::to_owned).collect()
}
