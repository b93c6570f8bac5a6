//! Reconnect loop
//!
//! One loop task runs per started client. Each iteration opens a stream,
//! decodes and dispatches events until the stream ends, then sleeps for the
//! backoff delay and tries again:
//!
//! ```text
//!  ┌─► Attempt ──connect──► Opened ──read/decode/dispatch──┐
//!  │       │                                               │
//!  │     error                                        EOF / error
//!  │       ▼                                               ▼
//!  └─ sleep(backoff) ◄── ReconnectScheduled ◄────────── Lost
//! ```
//!
//! Every wait selects on the run's cancellation token, so `stop` interrupts
//! connects, reads and backoff sleeps alike.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::protocol::{SseDecoder, SseEvent};
use crate::stats::ClientMetrics;
use crate::subscription::SubscriptionRegistry;

use super::backoff::BackoffPolicy;
use super::config::ClientConfig;
use super::connector::{ConnectRequest, EventByteStream, StreamConnector};
use super::state::{ConnectionEvent, ConnectionState, RunEvent, RunState, StateChange};

/// Initial read buffer size
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// State shared between a client handle and its loop task
pub(crate) struct Shared<C> {
    pub(crate) config: ClientConfig,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) connector: C,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) run_state: watch::Sender<RunState>,
    pub(crate) connection_state: watch::Sender<ConnectionState>,
    pub(crate) notifier: mpsc::UnboundedSender<StateChange>,
    pub(crate) metrics: ClientMetrics,
}

impl<C> Shared<C> {
    /// Queue a notification for the state dispatcher
    pub(crate) fn notify(&self, change: StateChange) {
        // Fails only once the dispatcher is gone, i.e. during teardown
        let _ = self.notifier.send(change);
    }

    /// Drive the connection state machine and publish its notifications
    pub(crate) fn apply(&self, event: ConnectionEvent) {
        let mut notifications = Vec::new();
        self.connection_state.send_if_modified(|state| {
            let transition = state.on(event);
            let changed = *state != transition.state;
            *state = transition.state;
            notifications = transition.notifications;
            changed
        });

        for state in notifications {
            tracing::debug!(state = %state, "Connection state changed");
            self.notify(StateChange::Connection(state));
        }
    }

    /// Drive the run state machine; returns whether the event applied
    pub(crate) fn advance_run(&self, event: RunEvent) -> bool {
        let mut next = None;
        self.run_state.send_if_modified(|state| {
            next = state.on(event);
            if let Some(next) = next {
                *state = next;
            }
            next.is_some()
        });

        match next {
            Some(state) => {
                tracing::debug!(state = %state, "Run state changed");
                self.notify(StateChange::Run(state));
                true
            }
            None => false,
        }
    }
}

enum ReadOutcome {
    Cancelled,
    Ended,
    Failed(io::Error),
}

/// Run until `cancel` fires
pub(crate) async fn run<C: StreamConnector>(
    shared: Arc<Shared<C>>,
    url: Url,
    cancel: CancellationToken,
) {
    let mut attempts: u32 = 0;
    let mut last_event_id: Option<String> = None;
    let mut decoder = SseDecoder::with_max_line_length(shared.config.max_line_length);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    tracing::info!(url = %url, "Reconnect loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        shared.apply(ConnectionEvent::Attempt);
        shared.metrics.connection_attempt();

        let request = ConnectRequest {
            url: url.clone(),
            last_event_id: last_event_id.clone(),
        };

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect(&shared, &request) => result,
        };

        match connected {
            Ok(stream) => {
                shared.apply(ConnectionEvent::Opened);
                shared.metrics.connection_opened();

                if attempts > 0 {
                    tracing::info!(url = %url, attempts, "Reconnected");
                    shared.metrics.reconnected();
                    shared.notify(StateChange::Reconnected { attempts });
                } else {
                    tracing::info!(url = %url, "Connected");
                }
                attempts = 0;

                let outcome = read_events(
                    &shared,
                    stream,
                    &mut decoder,
                    &mut buf,
                    &mut last_event_id,
                    &cancel,
                )
                .await;

                match outcome {
                    ReadOutcome::Cancelled => break,
                    ReadOutcome::Ended => {
                        tracing::debug!(url = %url, "Event stream ended");
                    }
                    ReadOutcome::Failed(e) => {
                        tracing::debug!(url = %url, error = %e, "Event stream failed");
                    }
                }
            }
            Err(e) => {
                tracing::debug!(
                    url = %url,
                    attempt = attempts.saturating_add(1),
                    error = %e,
                    "Connect attempt failed"
                );
            }
        }

        shared.apply(ConnectionEvent::Lost);

        attempts = attempts.saturating_add(1);
        let delay = shared.backoff.delay(attempts);
        shared.notify(StateChange::ReconnectScheduled {
            attempt: attempts,
            delay,
        });

        tracing::info!(
            url = %url,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!(url = %url, "Reconnect loop exited");
}

async fn connect<C: StreamConnector>(
    shared: &Shared<C>,
    request: &ConnectRequest,
) -> io::Result<EventByteStream> {
    let attempt = shared.connector.connect(request);

    match shared.config.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect attempt timed out"))?,
        None => attempt.await,
    }
}

async fn read_events<C>(
    shared: &Shared<C>,
    mut stream: EventByteStream,
    decoder: &mut SseDecoder,
    buf: &mut BytesMut,
    last_event_id: &mut Option<String>,
    cancel: &CancellationToken,
) -> ReadOutcome {
    // Leftovers from a previous connection never join records of this one
    decoder.reset();
    buf.clear();

    loop {
        buf.reserve(READ_BUFFER_SIZE);

        let read = tokio::select! {
            _ = cancel.cancelled() => return ReadOutcome::Cancelled,
            read = stream.read_buf(buf) => read,
        };

        match read {
            Ok(0) => {
                while let Some(event) = decoder.decode_eof(buf) {
                    deliver(shared, &event, last_event_id);
                }
                return ReadOutcome::Ended;
            }
            Ok(_) => {
                while let Some(event) = decoder.decode(buf) {
                    deliver(shared, &event, last_event_id);
                    if cancel.is_cancelled() {
                        return ReadOutcome::Cancelled;
                    }
                }
            }
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
}

fn deliver<C>(shared: &Shared<C>, event: &SseEvent, last_event_id: &mut Option<String>) {
    if let Some(id) = &event.id {
        *last_event_id = Some(id.clone());
    }
    shared.metrics.event_received();
    shared.registry.dispatch(event);
}
