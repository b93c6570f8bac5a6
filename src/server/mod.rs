//! HTTP event-stream endpoint
//!
//! Serves a [`BroadcastQueue`](crate::broadcast::BroadcastQueue) through an
//! axum route. Each request gets its own queue subscription, streamed as
//! `text/event-stream` with periodic keep-alive comments while idle.

pub mod config;
pub mod listener;
mod routes;

pub use config::ServerConfig;
pub use listener::SseServer;
