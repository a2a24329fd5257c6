//! Network transport for the orchestration engine: a duplex WebSocket
//! channel plus a REST surface, both built on axum over the core's
//! service layer. The core itself is transport-agnostic; this crate is
//! the only place that speaks HTTP or WebSocket framing.

pub mod auth;
pub mod rest;
pub mod state;
pub mod ws;

pub use rest::router;
pub use state::AppState;
