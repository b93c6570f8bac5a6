//! Broadcast fan-out queue
//!
//! Publishers hand messages to a [`BroadcastQueue`]; every attached
//! [`QueueSubscription`] receives each message published after it attached.
//!
//! # Architecture
//!
//! ```text
//!                   Arc<BroadcastQueue>
//!              ┌──────────────────────────┐
//!  publish() ─►│ tx: broadcast::Sender    │
//!              │ ring: [m0 m1 ... mN]     │
//!              └────────────┬─────────────┘
//!                           │
//!          ┌────────────────┼────────────────┐
//!          ▼                ▼                ▼
//!   [Subscription]   [Subscription]   [Subscription]
//!     cursor 12        cursor 40        cursor 40
//!          │                │                │
//!          └──► SseServer route (axum Sse) ◄─┘
//! ```
//!
//! # Zero-Copy Design
//!
//! `QueueMessage` holds its type and payload as `Arc<str>`, so the ring and
//! all subscribers share one allocation per message.

pub mod config;
pub mod message;
pub mod queue;

pub use config::{QueueConfig, MAX_CAPACITY};
pub use message::{short_type_name, QueueMessage};
pub use queue::{BroadcastQueue, QueueSubscription};
