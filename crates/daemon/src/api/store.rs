// Key-value store endpoints.
//
// Routes:
//   POST   /store/items/get      fetch one item by namespace and key
//   PUT    /store/items          insert or overwrite
//   POST   /store/items/delete   remove

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{post, put},
    Router,
};
use canvas_common::protocol::store::{ItemEnvelope, ItemKey, PutItemRequest};
use tracing::debug;

use super::error::ApiError;
use super::ApiState;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/store/items/get", post(get_item))
        .route("/store/items", put(put_item))
        .route("/store/items/delete", post(delete_item))
        .with_state(state)
}

async fn get_item(
    State(state): State<ApiState>,
    Json(payload): Json<ItemKey>,
) -> Result<Json<ItemEnvelope>, ApiError> {
    let item = state.stores.kv.get_item(&payload.namespace, &payload.key).await?;
    Ok(Json(ItemEnvelope { item }))
}

async fn put_item(
    State(state): State<ApiState>,
    Json(payload): Json<PutItemRequest>,
) -> Result<Json<ItemEnvelope>, ApiError> {
    let item = state.stores.kv.put_item(&payload.namespace, &payload.key, payload.value).await?;
    debug!(namespace = ?item.namespace, key = %item.key, "stored item");
    Ok(Json(ItemEnvelope { item: Some(item) }))
}

async fn delete_item(
    State(state): State<ApiState>,
    Json(payload): Json<ItemKey>,
) -> Result<StatusCode, ApiError> {
    state.stores.kv.delete_item(&payload.namespace, &payload.key).await?;
    Ok(StatusCode::NO_CONTENT)
}
