// In-memory thread store. Every mutation runs under the single write lock,
// which also serializes version appends per thread.

use std::collections::HashMap;
use std::sync::Arc;

use canvas_common::types::{Artifact, ArtifactDraft, ArtifactVersion, Message, Thread};
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{shallow_merge, StoreError, StoreResult};
use crate::artifact::{self, ArtifactImport};

#[derive(Debug, Default)]
pub struct MemoryState {
    threads: HashMap<Uuid, MemoryThread>,
}

#[derive(Debug)]
struct MemoryThread {
    thread: Thread,
    messages: Vec<Message>,
    versions: Vec<ArtifactVersion>,
    current_index: Option<u32>,
}

impl MemoryThread {
    fn touch(&mut self) {
        self.thread.updated_at = Utc::now();
    }
}

impl MemoryState {
    fn thread_mut(&mut self, thread_id: Uuid) -> StoreResult<&mut MemoryThread> {
        self.threads.get_mut(&thread_id).ok_or_else(|| StoreError::thread_not_found(thread_id))
    }

    fn thread(&self, thread_id: Uuid) -> StoreResult<&MemoryThread> {
        self.threads.get(&thread_id).ok_or_else(|| StoreError::thread_not_found(thread_id))
    }
}

/// Insert unless the id is taken; `None` when it already was.
pub(super) async fn insert_thread(
    state: &Arc<RwLock<MemoryState>>,
    thread: Thread,
) -> StoreResult<Option<Thread>> {
    let mut state = state.write().await;
    if state.threads.contains_key(&thread.id) {
        return Ok(None);
    }
    state.threads.insert(
        thread.id,
        MemoryThread {
            thread: thread.clone(),
            messages: Vec::new(),
            versions: Vec::new(),
            current_index: None,
        },
    );
    Ok(Some(thread))
}

pub(super) async fn get_thread(
    state: &Arc<RwLock<MemoryState>>,
    thread_id: Uuid,
) -> StoreResult<Thread> {
    Ok(state.read().await.thread(thread_id)?.thread.clone())
}

pub(super) async fn merge_metadata(
    state: &Arc<RwLock<MemoryState>>,
    thread_id: Uuid,
    patch: Map<String, Value>,
) -> StoreResult<Thread> {
    let mut state = state.write().await;
    let entry = state.thread_mut(thread_id)?;
    shallow_merge(&mut entry.thread.metadata, patch);
    entry.touch();
    Ok(entry.thread.clone())
}

pub(super) async fn delete_thread(
    state: &Arc<RwLock<MemoryState>>,
    thread_id: Uuid,
) -> StoreResult<()> {
    state
        .write()
        .await
        .threads
        .remove(&thread_id)
        .map(|_| ())
        .ok_or_else(|| StoreError::thread_not_found(thread_id))
}

pub(super) async fn list_threads(state: &Arc<RwLock<MemoryState>>) -> StoreResult<Vec<Thread>> {
    let state = state.read().await;
    let mut threads: Vec<Thread> = state.threads.values().map(|t| t.thread.clone()).collect();
    threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    Ok(threads)
}

pub(super) async fn get_messages(
    state: &Arc<RwLock<MemoryState>>,
    thread_id: Uuid,
) -> StoreResult<Vec<Message>> {
    Ok(state.read().await.thread(thread_id)?.messages.clone())
}

pub(super) async fn replace_messages(
    state: &Arc<RwLock<MemoryState>>,
    thread_id: Uuid,
    messages: Vec<Message>,
) -> StoreResult<()> {
    let mut state = state.write().await;
    let entry = state.thread_mut(thread_id)?;
    entry.messages = messages;
    entry.touch();
    Ok(())
}

pub(super) async fn get_artifact(
    state: &Arc<RwLock<MemoryState>>,
    thread_id: Uuid,
) -> StoreResult<Option<Artifact>> {
    let state = state.read().await;
    let entry = state.thread(thread_id)?;
    Ok(artifact::assemble(entry.versions.clone(), entry.current_index))
}

pub(super) async fn append_version(
    state: &Arc<RwLock<MemoryState>>,
    thread_id: Uuid,
    draft: ArtifactDraft,
) -> StoreResult<ArtifactVersion> {
    let mut state = state.write().await;
    let entry = state.thread_mut(thread_id)?;
    let version = artifact::plan_append(&entry.versions, draft);
    entry.versions.push(version.clone());
    entry.current_index = Some(version.index);
    entry.touch();
    Ok(version)
}

pub(super) async fn apply_import(
    state: &Arc<RwLock<MemoryState>>,
    thread_id: Uuid,
    import: ArtifactImport,
) -> StoreResult<()> {
    let mut state = state.write().await;
    let entry = state.thread_mut(thread_id)?;
    let plan = import.plan(&entry.versions)?;
    entry.versions.extend(plan.append);
    if plan.current_index.is_some() {
        entry.current_index = plan.current_index;
    }
    entry.touch();
    Ok(())
}
