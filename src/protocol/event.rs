//! Decoded event record

use super::constants::DEFAULT_EVENT_TYPE;

/// A single event decoded from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type (`"message"` when the frame had no `event:` line)
    pub event_type: String,
    /// Data lines joined with `\n`
    pub data: String,
    /// Event id, only when the frame carried one
    pub id: Option<String>,
}

impl SseEvent {
    /// Create an event with an explicit type and no id
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            id: None,
        }
    }

    /// Create a default-typed (`"message"`) event
    pub fn message(data: impl Into<String>) -> Self {
        Self::new(DEFAULT_EVENT_TYPE, data)
    }

    /// Attach an id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Short preview of the data for log output
    pub fn preview(&self) -> &str {
        const PREVIEW_CHARS: usize = 64;
        match self.data.char_indices().nth(PREVIEW_CHARS) {
            Some((idx, _)) => &self.data[..idx],
            None => &self.data,
        }
    }
}
