//! Event-stream protocol constants

/// Media type of an event stream response
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Event type assumed when a record carries no `event:` field
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Field carrying the event type
pub const FIELD_EVENT: &str = "event";

/// Field carrying one line of event data
pub const FIELD_DATA: &str = "data";

/// Field carrying the event id
pub const FIELD_ID: &str = "id";

/// Request header echoing the last id seen before a reconnect
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Default upper bound for a single line on the wire (1MB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Version stamped on every queue message
pub const QUEUE_MESSAGE_VERSION: u32 = 1;
