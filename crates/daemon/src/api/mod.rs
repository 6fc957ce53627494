// HTTP surface for canvasd: thread state, artifact versions, the key-value
// store and (when a generation client is wired) conversation turns.

pub mod error;
pub mod store;
pub mod threads;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tracing::info;

use crate::engine::Engine;
use crate::store::Stores;
use error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope};

pub const MAX_REQUEST_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub stores: Stores,
    pub engine: Option<Arc<Engine>>,
}

impl ApiState {
    pub fn from_stores(stores: Stores) -> Self {
        Self { stores, engine: None }
    }

    pub fn from_engine(engine: Arc<Engine>) -> Self {
        Self { stores: engine.stores().clone(), engine: Some(engine) }
    }
}

/// Build the full router with middleware applied.
pub fn router(state: ApiState) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(threads::router(state.clone()))
            .merge(store::router(state)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{body::Body, http::Request, response::Response};

    pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).expect("body should serialize")))
            .expect("request should build")
    }

    pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build")
    }

    pub async fn read_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("response body should be readable");
        serde_json::from_slice(&bytes).expect("response body should be valid json")
    }
}
