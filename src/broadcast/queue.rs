//! Broadcast queue implementation
//!
//! Every subscriber owns a cursor into one shared bounded ring
//! (`tokio::sync::broadcast`). Publishing never blocks: a subscriber that
//! falls more than `capacity` messages behind loses the oldest ones, and the
//! loss is counted and logged when it next receives.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::stats::{QueueMetrics, QueueStats};

use super::config::QueueConfig;
use super::message::{short_type_name, QueueMessage};

/// Fan-out queue delivering every message to every current subscriber
pub struct BroadcastQueue {
    /// `None` once closed
    tx: RwLock<Option<broadcast::Sender<QueueMessage>>>,
    subscribers: Arc<AtomicUsize>,
    next_subscriber_id: AtomicU64,
    metrics: Arc<QueueMetrics>,
    config: QueueConfig,
}

impl BroadcastQueue {
    /// Create a queue with default configuration
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create a queue with custom configuration
    pub fn with_config(config: QueueConfig) -> Self {
        let (tx, _) = broadcast::channel(config.ring_capacity());

        Self {
            tx: RwLock::new(Some(tx)),
            subscribers: Arc::new(AtomicUsize::new(0)),
            next_subscriber_id: AtomicU64::new(1),
            metrics: Arc::new(QueueMetrics::default()),
            config,
        }
    }

    /// Get the queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Publish `value` serialized as JSON
    ///
    /// Returns the number of subscribers the message was queued for.
    pub fn publish<T>(&self, message_type: &str, value: &T) -> Result<usize>
    where
        T: Serialize + ?Sized,
    {
        if message_type.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "message type must be non-empty".into(),
            ));
        }
        if message_type.contains(['\r', '\n']) {
            return Err(Error::InvalidArgument(
                "message type must be a single line".into(),
            ));
        }

        let message = QueueMessage::json(message_type, value)?;
        Ok(self.send(message))
    }

    /// Publish `value` under its unqualified type name
    pub fn publish_typed<T: Serialize>(&self, value: &T) -> Result<usize> {
        self.publish(short_type_name::<T>(), value)
    }

    /// Publish a pre-serialized payload
    pub fn publish_raw(&self, message_type: &str, payload: &str) -> usize {
        self.send(QueueMessage::new(message_type, payload))
    }

    /// Publish a prepared message
    pub fn send(&self, message: QueueMessage) -> usize {
        let tx = self.tx.read().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = tx.as_ref() else {
            tracing::debug!(message_type = %message.message_type, "Queue closed, message discarded");
            return 0;
        };

        self.metrics.published();

        tracing::trace!(
            message_type = %message.message_type,
            subscribers = self.subscriber_count(),
            "Publishing message"
        );

        // Err only means nobody is listening
        tx.send(message).unwrap_or(0)
    }

    /// Attach a new subscriber
    ///
    /// Only messages published after this call are delivered. On a closed
    /// queue the subscription ends immediately.
    pub fn subscribe(&self) -> QueueSubscription {
        let rx = {
            let tx = self.tx.read().unwrap_or_else(|e| e.into_inner());
            match tx.as_ref() {
                Some(tx) => tx.subscribe(),
                None => {
                    let (closed_tx, rx) = broadcast::channel(1);
                    drop(closed_tx);
                    rx
                }
            }
        };

        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let count = self.subscribers.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(subscriber_id = id, subscribers = count, "Subscriber added");

        QueueSubscription {
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    /// Snapshot of the queue counters
    pub fn stats(&self) -> QueueStats {
        self.metrics.snapshot(self.subscriber_count())
    }

    /// Stop accepting messages
    ///
    /// Subscribers still receive what was already queued for them, then
    /// observe end of stream.
    pub fn close(&self) {
        let closed = self
            .tx
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if closed.is_some() {
            tracing::info!(subscribers = self.subscriber_count(), "Broadcast queue closed");
        }
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.tx.read().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

impl Default for BroadcastQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of a [`BroadcastQueue`]
///
/// Messages arrive in publish order. Dropping the subscription detaches it.
pub struct QueueSubscription {
    id: u64,
    rx: broadcast::Receiver<QueueMessage>,
    subscribers: Arc<AtomicUsize>,
    metrics: Arc<QueueMetrics>,
}

impl QueueSubscription {
    /// Subscriber id, unique per queue
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receive the next message
    ///
    /// Returns `None` once the queue is closed and drained. Messages lost to
    /// lagging are skipped. Cancel safe.
    pub async fn recv(&mut self) -> Option<QueueMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        subscriber_id = self.id,
                        skipped,
                        "Subscriber lagging, oldest messages dropped"
                    );
                    self.metrics.dropped(skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Receive the next message unless `cancel` fires first
    pub async fn recv_until(&mut self, cancel: &CancellationToken) -> Option<QueueMessage> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            message = self.recv() => message,
        }
    }

    /// Turn the subscription into a stream that ends on close or cancel
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = QueueMessage> + Send {
        stream::unfold((self, cancel), |(mut subscription, cancel)| async move {
            let message = subscription.recv_until(&cancel).await?;
            Some((message, (subscription, cancel)))
        })
    }
}

impl Drop for QueueSubscription {
    fn drop(&mut self) {
        let remaining = self
            .subscribers
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        tracing::debug!(subscriber_id = self.id, subscribers = remaining, "Subscriber removed");
    }
}
