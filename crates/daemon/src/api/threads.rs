// Thread endpoints.
//
// Routes:
//   POST   /threads                               create (optional metadata)
//   POST   /threads/search                        search by metadata, newest first
//   GET    /threads/{thread_id}                   full state
//   DELETE /threads/{thread_id}                   delete with messages and versions
//   POST   /threads/{thread_id}/state             merge values and/or metadata
//   GET    /threads/{thread_id}/artifact          artifact at a version (default latest)
//   GET    /threads/{thread_id}/artifact/versions version indices and current pointer
//   POST   /threads/{thread_id}/runs              run a conversation turn

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use canvas_common::protocol::threads::{
    ArtifactPayload, ArtifactQuery, CreateThreadRequest, SearchThreadsRequest, ThreadState,
    UpdateStateRequest,
};
use canvas_common::types::ArtifactVersionMeta;
use tracing::info;
use uuid::Uuid;

use super::error::ApiError;
use super::ApiState;
use crate::engine::{Engine, TurnOutcome, TurnRequest};

// ── Router ─────────────────────────────────────────────────────────

pub fn router(state: ApiState) -> Router {
    let engine = state.engine.clone();
    let router = Router::new()
        .route("/threads", post(create_thread))
        .route("/threads/search", post(search_threads))
        .route("/threads/{thread_id}", get(get_thread).delete(delete_thread))
        .route("/threads/{thread_id}/state", post(update_state))
        .route("/threads/{thread_id}/artifact", get(get_artifact))
        .route("/threads/{thread_id}/artifact/versions", get(get_artifact_versions))
        .with_state(state);

    match engine {
        Some(engine) => router.merge(
            Router::new().route("/threads/{thread_id}/runs", post(run_turn)).with_state(engine),
        ),
        None => router,
    }
}

// ── Handlers ───────────────────────────────────────────────────────

async fn create_thread(
    State(state): State<ApiState>,
    Json(payload): Json<CreateThreadRequest>,
) -> Result<(StatusCode, Json<ThreadState>), ApiError> {
    let threads = &state.stores.threads;
    let thread = threads.create_thread(payload.metadata).await?;
    info!(thread_id = %thread.id, "created thread");
    Ok((StatusCode::CREATED, Json(threads.thread_state(thread.id).await?)))
}

async fn search_threads(
    State(state): State<ApiState>,
    Json(payload): Json<SearchThreadsRequest>,
) -> Result<Json<Vec<ThreadState>>, ApiError> {
    let results = state.stores.threads.search_threads(payload.limit, &payload.metadata).await?;
    Ok(Json(results))
}

async fn get_thread(
    State(state): State<ApiState>,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<ThreadState>, ApiError> {
    Ok(Json(state.stores.threads.thread_state(thread_id).await?))
}

async fn delete_thread(
    State(state): State<ApiState>,
    Path(thread_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.stores.threads.delete_thread(thread_id).await?;
    info!(thread_id = %thread_id, "deleted thread");
    Ok(StatusCode::NO_CONTENT)
}

async fn update_state(
    State(state): State<ApiState>,
    Path(thread_id): Path<Uuid>,
    Json(payload): Json<UpdateStateRequest>,
) -> Result<Json<ThreadState>, ApiError> {
    Ok(Json(state.stores.threads.update_state(thread_id, payload).await?))
}

async fn get_artifact(
    State(state): State<ApiState>,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<ArtifactQuery>,
) -> Result<Json<ArtifactPayload>, ApiError> {
    let artifact = state.stores.threads.artifact_at(thread_id, query.version).await?;
    Ok(Json(artifact.into()))
}

async fn get_artifact_versions(
    State(state): State<ApiState>,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<ArtifactVersionMeta>, ApiError> {
    Ok(Json(state.stores.threads.artifact_metadata(thread_id).await?))
}

async fn run_turn(
    State(engine): State<Arc<Engine>>,
    Path(thread_id): Path<Uuid>,
    Json(payload): Json<TurnRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    Ok(Json(engine.run_turn(thread_id, payload).await?))
}
