//! Event-stream client
//!
//! Keeps a long-lived subscription to a server-pushed event stream:
//! - Reconnects with linear backoff plus jitter when the stream drops
//! - Tracks run and connection state separately
//! - Dispatches decoded events to registered callbacks

pub mod backoff;
pub mod config;
pub mod connector;
mod reconnect;
pub mod state;
pub mod stream_client;

pub use backoff::BackoffPolicy;
pub use config::ClientConfig;
pub use connector::{ConnectRequest, EventByteStream, HttpConnector, StreamConnector};
pub use state::{ConnectionEvent, ConnectionState, RunEvent, RunState, StateChange, Transition};
pub use stream_client::SseClient;
