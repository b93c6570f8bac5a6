//! Callback subscriptions
//!
//! Listeners register callbacks keyed by event type, for every event, or for
//! client state changes. A listener may be tied to an owner object held only
//! weakly, so subscribing never extends the owner's lifetime:
//!
//! ```text
//!   Arc<Widget> ──weak──► Entry { invoke, owner } ◄── CallbackBag (dashmap)
//!        │                                                   ▲
//!      drop                                        registry.dispatch(&event)
//!        ▼                                                   │
//!   entry pruned on next dispatch ◄──────── upgrade() fails ─┘
//! ```

mod bag;
pub mod owner;
pub mod registry;

pub use owner::SubscriptionId;
pub use registry::SubscriptionRegistry;
