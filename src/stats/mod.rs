//! Runtime counters

pub mod metrics;

pub use metrics::{ClientStats, QueueStats, ServerStats};
pub(crate) use metrics::{ClientMetrics, QueueMetrics, ServerMetrics};
