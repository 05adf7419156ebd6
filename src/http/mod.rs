//! REST and WebSocket surface over the engine.

pub mod api;
pub mod server;
pub mod ws;

pub use api::{AppState, SharedState};
pub use server::{build_router, serve};
