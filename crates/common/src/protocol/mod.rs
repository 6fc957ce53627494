// Wire DTOs for the canvas HTTP surface.

pub mod store;
pub mod threads;
