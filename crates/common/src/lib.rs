// canvas-common: shared types for the canvas workspace

pub mod command;
pub mod protocol;
pub mod types;
