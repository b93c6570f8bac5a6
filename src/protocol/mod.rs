//! Event-stream wire protocol
//!
//! The wire format is UTF-8 text made of `field: value` lines. A blank line
//! terminates a record:
//!
//! ```text
//! id: 42
//! event: Score
//! data: {"home":1,
//! data:  "away":0}
//!
//! ```
//!
//! Only `id`, `event` and `data` are interpreted. Comment lines (starting
//! with `:`) and unknown fields are skipped.

pub mod codec;
pub mod constants;
pub mod event;

pub use codec::{encode_comment, encode_event, SseDecoder};
pub use event::SseEvent;
