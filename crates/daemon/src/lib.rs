// canvas-daemon library: conversation orchestration, persistence and the
// HTTP surface served by `canvasd`.

pub mod api;
pub mod artifact;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod router;
pub mod search;
pub mod sharing;
pub mod state;
pub mod store;
