//! Counters for clients, queues and the streaming server
//!
//! Live counters are plain atomics updated on hot paths; callers read
//! consistent-enough snapshots through the `*Stats` structs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Snapshot of stream client counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Connect attempts made, successful or not
    pub connection_attempts: u64,
    /// Attempts that produced an open stream
    pub connections_opened: u64,
    /// Outages that ended with a successful reconnect
    pub reconnects: u64,
    /// Events decoded and dispatched
    pub events_received: u64,
}

impl ClientStats {
    /// Attempts that did not produce an open stream
    pub fn failed_attempts(&self) -> u64 {
        self.connection_attempts
            .saturating_sub(self.connections_opened)
    }
}

/// Live client counters
#[derive(Debug, Default)]
pub(crate) struct ClientMetrics {
    connection_attempts: AtomicU64,
    connections_opened: AtomicU64,
    reconnects: AtomicU64,
    events_received: AtomicU64,
}

impl ClientMetrics {
    pub(crate) fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ClientStats {
        ClientStats {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of broadcast queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages accepted by `publish*`
    pub published: u64,
    /// Messages a lagging subscriber skipped, summed over subscribers
    pub dropped: u64,
    /// Subscribers currently attached
    pub subscribers: u64,
}

/// Live queue counters
#[derive(Debug, Default)]
pub(crate) struct QueueMetrics {
    published: AtomicU64,
    dropped: AtomicU64,
}

impl QueueMetrics {
    pub(crate) fn published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, subscribers: usize) -> QueueStats {
        QueueStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscribers: subscribers as u64,
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Connections currently streaming
    pub active_connections: u64,
    /// Stream requests refused at the connection limit
    pub rejected_requests: u64,
    /// Time since the server was created
    pub uptime: Duration,
}

/// Live server counters
#[derive(Debug)]
pub(crate) struct ServerMetrics {
    started_at: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_requests: AtomicU64,
}

impl ServerMetrics {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
        }
    }

    pub(crate) fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        // Never wraps below zero
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn request_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}
