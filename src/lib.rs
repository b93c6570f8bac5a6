//! Resilient Server-Sent Events client and broadcast fan-out server
//!
//! Two halves share one wire codec:
//!
//! - [`client::SseClient`] keeps a long-lived subscription to an event
//!   stream, reconnecting with backoff and dispatching decoded events to
//!   registered callbacks.
//! - [`broadcast::BroadcastQueue`] fans published messages out to every
//!   connected subscriber, and [`server::SseServer`] streams it over HTTP.
//!
//! ```text
//!  publish ─► BroadcastQueue ─► SseServer ─► TCP ─► SseClient ─► callbacks
//!                 (ring)        (axum Sse)         (decode, reconnect)
//! ```
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use sse_rs::broadcast::BroadcastQueue;
//! use sse_rs::server::{ServerConfig, SseServer};
//!
//! # async fn example() -> sse_rs::error::Result<()> {
//! let queue = Arc::new(BroadcastQueue::new());
//! let server = SseServer::new(ServerConfig::default(), Arc::clone(&queue));
//!
//! tokio::spawn(async move { server.run().await });
//!
//! queue.publish_raw("Score", r#"{"home":1,"away":0}"#);
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod subscription;

pub use broadcast::{BroadcastQueue, QueueConfig, QueueMessage, QueueSubscription};
pub use client::{ClientConfig, ConnectionState, RunState, SseClient, StateChange};
pub use error::{Error, Result};
pub use protocol::SseEvent;
pub use server::{ServerConfig, SseServer};
pub use subscription::{SubscriptionId, SubscriptionRegistry};
