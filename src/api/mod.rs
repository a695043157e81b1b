//! HTTP surface: `POST /api/chat` in front of the contract assistant.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{build_router, start_server, AppState};
