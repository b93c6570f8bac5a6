//! Queue message type

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::protocol::constants::QUEUE_MESSAGE_VERSION;
use crate::protocol::SseEvent;

/// Message fanned out to every subscriber
///
/// Cloning is cheap: every subscriber shares the same type and payload
/// allocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Becomes the `event:` field on the wire
    pub message_type: Arc<str>,
    /// Payload format version
    pub version: u32,
    /// Serialized body, opaque to the queue
    pub payload: Arc<str>,
}

impl QueueMessage {
    /// Create a message from an already serialized payload
    pub fn new(message_type: impl Into<Arc<str>>, payload: impl Into<Arc<str>>) -> Self {
        Self {
            message_type: message_type.into(),
            version: QUEUE_MESSAGE_VERSION,
            payload: payload.into(),
        }
    }

    /// Create a message with a JSON payload
    pub fn json<T>(message_type: impl Into<Arc<str>>, value: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(value)?;
        Ok(Self::new(message_type, payload))
    }

    /// Event record carrying this message under `id`
    pub fn to_event(&self, id: impl Into<String>) -> SseEvent {
        SseEvent::new(&*self.message_type, &*self.payload).with_id(id)
    }
}

/// Unqualified name of `T`, without generic arguments
///
/// `scores::feed::ScoreUpdate<u32>` becomes `ScoreUpdate`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
