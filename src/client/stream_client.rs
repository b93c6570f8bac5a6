//! Resilient event-stream client
//!
//! [`SseClient`] owns the run lifecycle. `start` launches a reconnect loop
//! task, `stop` cancels it and waits for it to exit, so at most one byte
//! stream is ever open per client. All lifecycle calls are serialized
//! through one async mutex.
//!
//! State changes are published two ways:
//!
//! - `watch` channels hold the current [`RunState`] / [`ConnectionState`]
//! - [`StateChange`] notifications are queued on an unbounded channel and
//!   delivered to state subscribers by a dispatcher task, so a slow listener
//!   never holds up a transition
//!
//! # Example
//! ```no_run
//! use sse_rs::client::{ClientConfig, SseClient};
//!
//! # async fn example() -> sse_rs::error::Result<()> {
//! let config = ClientConfig::new("https://scores.example/stream")?;
//! let client = SseClient::new(config)?;
//!
//! client.subscribe("Score", |event| {
//!     println!("score update: {}", event.data);
//! })?;
//!
//! client.start(None, false).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::SseEvent;
use crate::stats::{ClientMetrics, ClientStats};
use crate::subscription::{SubscriptionId, SubscriptionRegistry};

use super::config::ClientConfig;
use super::connector::{HttpConnector, StreamConnector};
use super::reconnect::{self, Shared};
use super::state::{ConnectionEvent, ConnectionState, RunEvent, RunState, StateChange};

/// Long-lived event-stream subscription that reconnects on its own
///
/// Cloning yields another handle to the same client. Dropping the last
/// handle cancels the reconnect loop.
pub struct SseClient<C: StreamConnector = HttpConnector> {
    inner: Arc<ClientInner<C>>,
}

struct ClientInner<C> {
    shared: Arc<Shared<C>>,
    lifecycle: Mutex<Lifecycle>,
    disposed: AtomicBool,
}

struct Lifecycle {
    url: Option<Url>,
    run: Option<RunHandle>,
    notifications: Option<mpsc::UnboundedReceiver<StateChange>>,
    dispatcher: Option<JoinHandle<()>>,
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SseClient<HttpConnector> {
    /// Create a client using the HTTP transport
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connector = HttpConnector::new(&config)?;
        Self::with_connector(config, connector)
    }
}

impl<C: StreamConnector> SseClient<C> {
    /// Create a client over a custom transport
    pub fn with_connector(config: ClientConfig, connector: C) -> Result<Self> {
        config.validate()?;

        let (notifier, notifications) = mpsc::unbounded_channel();
        let auto_start = config.auto_start && config.base_address.is_some();

        let shared = Arc::new(Shared {
            backoff: config.backoff(),
            config,
            connector,
            registry: Arc::new(SubscriptionRegistry::new()),
            run_state: watch::Sender::new(RunState::Stopped),
            connection_state: watch::Sender::new(ConnectionState::Closed),
            notifier,
            metrics: ClientMetrics::default(),
        });

        let client = Self {
            inner: Arc::new(ClientInner {
                shared,
                lifecycle: Mutex::new(Lifecycle {
                    url: None,
                    run: None,
                    notifications: Some(notifications),
                    dispatcher: None,
                }),
                disposed: AtomicBool::new(false),
            }),
        };

        if auto_start {
            client.spawn_auto_start();
        }

        Ok(client)
    }

    fn spawn_auto_start(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available, auto start skipped");
            return;
        };

        let client = self.clone();
        handle.spawn(async move {
            if let Err(e) = client.start(None, false).await {
                tracing::warn!(error = %e, "Auto start failed");
            }
        });
    }

    /// Start streaming
    ///
    /// `url` may be absolute, relative to the base address, or omitted to
    /// use the base address. Starting again with the same URL is a no-op. A
    /// different URL restarts the stream when `restart_on_different_url`
    /// is set and is ignored otherwise.
    pub async fn start(&self, url: Option<&str>, restart_on_different_url: bool) -> Result<()> {
        self.ensure_live()?;
        let url = self.inner.shared.config.resolve_url(url)?;

        let mut lifecycle = self.inner.lifecycle.lock().await;
        // Disposal may have won the race for the lock
        self.ensure_live()?;

        if lifecycle.run.is_some() {
            if lifecycle.url.as_ref() == Some(&url) {
                tracing::debug!(url = %url, "Already started");
                return Ok(());
            }

            if !restart_on_different_url {
                tracing::info!(
                    url = %url,
                    current = ?lifecycle.url.as_ref().map(Url::as_str),
                    "Already started on another URL, ignoring"
                );
                return Ok(());
            }

            tracing::info!(url = %url, "Restarting on new URL");
            self.stop_locked(&mut lifecycle).await;
        }

        self.launch(&mut lifecycle, url);
        Ok(())
    }

    /// Stop streaming and wait for the loop to exit
    ///
    /// A no-op when not started.
    pub async fn stop(&self) -> Result<()> {
        self.ensure_live()?;
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await;
        Ok(())
    }

    /// Stop streaming and release every subscription
    ///
    /// Further `start` / `stop` calls fail with [`Error::Disposed`].
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await;
        if let Some(dispatcher) = lifecycle.dispatcher.take() {
            dispatcher.abort();
        }
        lifecycle.notifications = None;
        self.inner.shared.registry.clear();

        tracing::debug!("Client disposed");
    }

    /// Whether `dispose` was called
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Current run state
    pub fn run_state(&self) -> RunState {
        *self.inner.shared.run_state.borrow()
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.shared.connection_state.borrow()
    }

    /// Observe run state changes
    pub fn watch_run_state(&self) -> watch::Receiver<RunState> {
        self.inner.shared.run_state.subscribe()
    }

    /// Observe connection state changes
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.connection_state.subscribe()
    }

    /// URL of the running stream, if started
    pub async fn current_url(&self) -> Option<Url> {
        self.inner.lifecycle.lock().await.url.clone()
    }

    /// Snapshot of the client counters
    pub fn stats(&self) -> ClientStats {
        self.inner.shared.metrics.snapshot()
    }

    /// Configuration in use
    pub fn config(&self) -> &ClientConfig {
        &self.inner.shared.config
    }

    /// Registry the loop dispatches into
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.shared.registry
    }

    /// See [`SubscriptionRegistry::subscribe`]
    pub fn subscribe<F>(&self, event_type: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&SseEvent) + Send + Sync + 'static,
    {
        self.subscriptions().subscribe(event_type, callback)
    }

    /// See [`SubscriptionRegistry::subscribe_with_cancel`]
    pub fn subscribe_with_cancel<F>(
        &self,
        event_type: &str,
        callback: F,
        cancel: CancellationToken,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&SseEvent) + Send + Sync + 'static,
    {
        self.subscriptions()
            .subscribe_with_cancel(event_type, callback, cancel)
    }

    /// See [`SubscriptionRegistry::subscribe_owned`]
    pub fn subscribe_owned<O, F>(
        &self,
        owner: &Arc<O>,
        event_type: &str,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        O: ?Sized + Send + Sync + 'static,
        F: Fn(&O, &SseEvent) + Send + Sync + 'static,
    {
        self.subscriptions()
            .subscribe_owned(owner, event_type, callback)
    }

    /// See [`SubscriptionRegistry::subscribe_all`]
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SseEvent) + Send + Sync + 'static,
    {
        self.subscriptions().subscribe_all(callback)
    }

    /// See [`SubscriptionRegistry::subscribe_all_owned`]
    pub fn subscribe_all_owned<O, F>(&self, owner: &Arc<O>, callback: F) -> SubscriptionId
    where
        O: ?Sized + Send + Sync + 'static,
        F: Fn(&O, &SseEvent) + Send + Sync + 'static,
    {
        self.subscriptions().subscribe_all_owned(owner, callback)
    }

    /// See [`SubscriptionRegistry::subscribe_state`]
    pub fn subscribe_state<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.subscriptions().subscribe_state(callback)
    }

    /// See [`SubscriptionRegistry::subscribe_state_owned`]
    pub fn subscribe_state_owned<O, F>(&self, owner: &Arc<O>, callback: F) -> SubscriptionId
    where
        O: ?Sized + Send + Sync + 'static,
        F: Fn(&O, &StateChange) + Send + Sync + 'static,
    {
        self.subscriptions().subscribe_state_owned(owner, callback)
    }

    /// See [`SubscriptionRegistry::unsubscribe`]
    pub fn unsubscribe(&self, event_type: &str, id: SubscriptionId) -> bool {
        self.subscriptions().unsubscribe(event_type, id)
    }

    /// See [`SubscriptionRegistry::unsubscribe_all`]
    pub fn unsubscribe_all(&self, id: SubscriptionId) -> bool {
        self.subscriptions().unsubscribe_all(id)
    }

    /// See [`SubscriptionRegistry::unsubscribe_state`]
    pub fn unsubscribe_state(&self, id: SubscriptionId) -> bool {
        self.subscriptions().unsubscribe_state(id)
    }

    /// See [`SubscriptionRegistry::unsubscribe_owner`]
    pub fn unsubscribe_owner<O: ?Sized>(&self, owner: &Arc<O>) -> usize {
        self.subscriptions().unsubscribe_owner(owner)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    fn launch(&self, lifecycle: &mut Lifecycle, url: Url) {
        let shared = &self.inner.shared;

        self.ensure_dispatcher(lifecycle);
        shared.advance_run(RunEvent::Start);
        // The loop drives the connection state only once the run is started
        shared.advance_run(RunEvent::Launched);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(reconnect::run(
            Arc::clone(shared),
            url.clone(),
            cancel.clone(),
        ));

        lifecycle.run = Some(RunHandle { cancel, task });
        lifecycle.url = Some(url.clone());

        tracing::info!(url = %url, "Client started");
    }

    fn ensure_dispatcher(&self, lifecycle: &mut Lifecycle) {
        let Some(mut notifications) = lifecycle.notifications.take() else {
            return;
        };

        let registry = Arc::clone(&self.inner.shared.registry);
        lifecycle.dispatcher = Some(tokio::spawn(async move {
            while let Some(change) = notifications.recv().await {
                registry.dispatch_state(&change);
            }
        }));
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        let Some(RunHandle { cancel, mut task }) = lifecycle.run.take() else {
            return;
        };
        let shared = &self.inner.shared;
        let stop_timeout = shared.config.stop_timeout;

        shared.advance_run(RunEvent::Stop);
        cancel.cancel();

        if tokio::time::timeout(stop_timeout, &mut task).await.is_err() {
            tracing::warn!(
                timeout_ms = stop_timeout.as_millis() as u64,
                "Reconnect loop did not exit in time, aborting"
            );
            task.abort();
            let _ = tokio::time::timeout(stop_timeout, task).await;
        }

        shared.apply(ConnectionEvent::Shutdown);
        shared.advance_run(RunEvent::Exited);

        let url = lifecycle.url.take();
        tracing::info!(url = ?url.as_ref().map(Url::as_str), "Client stopped");
    }
}

impl<C: StreamConnector> Clone for SseClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Drop for ClientInner<C> {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if let Some(run) = lifecycle.run.take() {
            run.cancel.cancel();
        }
        if let Some(dispatcher) = lifecycle.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};

    use super::*;
    use crate::client::connector::{ConnectRequest, EventByteStream};

    enum Step {
        /// Connect fails
        Fail,
        /// Stream delivers the bytes then ends
        Send(&'static str),
        /// Stream delivers the bytes and stays open
        Hold(&'static str),
        /// Stream delivers each chunk as a separate read then ends
        Chunks(Vec<&'static str>),
        /// Connect never completes
        Hang,
    }

    /// Stream that tracks how many are open at once
    struct TrackedStream {
        inner: EventByteStream,
        open: Arc<AtomicUsize>,
    }

    impl AsyncRead for TrackedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            self.inner.as_mut().poll_read(cx, buf)
        }
    }

    impl Drop for TrackedStream {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ScriptedConnector {
        script: StdMutex<VecDeque<Step>>,
        requests: StdMutex<Vec<ConnectRequest>>,
        writers: StdMutex<Vec<DuplexStream>>,
        open: Arc<AtomicUsize>,
        max_open: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                script: StdMutex::new(steps.into()),
                ..Default::default()
            }
        }
    }

    impl StreamConnector for Arc<ScriptedConnector> {
        async fn connect(&self, request: &ConnectRequest) -> io::Result<EventByteStream> {
            self.requests.lock().unwrap().push(request.clone());
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Hang);

            let inner: EventByteStream = match step {
                Step::Fail => return Err(io::Error::other("refused")),
                Step::Hang => std::future::pending().await,
                Step::Send(payload) => Box::pin(self.duplex(payload, false).await?),
                Step::Hold(payload) => Box::pin(self.duplex(payload, true).await?),
                Step::Chunks(chunks) => {
                    let mut mock = tokio_test::io::Builder::new();
                    for chunk in chunks {
                        mock.read(chunk.as_bytes());
                    }
                    Box::pin(mock.build())
                }
            };

            let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(open, Ordering::SeqCst);

            Ok(Box::pin(TrackedStream {
                inner,
                open: Arc::clone(&self.open),
            }))
        }
    }

    impl ScriptedConnector {
        async fn duplex(&self, payload: &str, hold: bool) -> io::Result<DuplexStream> {
            let (reader, mut writer) = tokio::io::duplex(64 * 1024);
            writer.write_all(payload.as_bytes()).await?;
            if hold {
                self.writers.lock().unwrap().push(writer);
            }
            Ok(reader)
        }
    }

    fn test_config() -> ClientConfig {
        ClientConfig::new("http://scores.test/stream")
            .unwrap()
            .reconnect(
                Duration::from_millis(100),
                Duration::from_millis(1000),
                Duration::ZERO,
            )
            .stop_timeout(Duration::from_secs(1))
    }

    fn client_with(steps: Vec<Step>) -> (SseClient<Arc<ScriptedConnector>>, Arc<ScriptedConnector>) {
        let connector = Arc::new(ScriptedConnector::new(steps));
        let client = SseClient::with_connector(test_config(), Arc::clone(&connector)).unwrap();
        (client, connector)
    }

    fn record_events(
        client: &SseClient<Arc<ScriptedConnector>>,
    ) -> mpsc::UnboundedReceiver<SseEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.subscribe_all(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    fn record_states(
        client: &SseClient<Arc<ScriptedConnector>>,
    ) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.subscribe_state(move |change| {
            let _ = tx.send(change.clone());
        });
        rx
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    async fn wait_for(rx: &mut mpsc::UnboundedReceiver<StateChange>, wanted: StateChange) {
        loop {
            if next(rx).await == wanted {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_start_without_url_fails() {
        let client =
            SseClient::with_connector(ClientConfig::default(), Arc::new(ScriptedConnector::default()))
                .unwrap();

        assert!(matches!(
            client.start(None, false).await,
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(client.run_state(), RunState::Stopped);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig::default().stop_timeout(Duration::ZERO);

        assert!(matches!(
            SseClient::with_connector(config, Arc::new(ScriptedConnector::default())),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_events_delivered() {
        let (client, _connector) =
            client_with(vec![Step::Hold("event: Score\ndata: 1-0\n\ndata: hello\n\n")]);
        let mut events = record_events(&client);

        client.start(None, false).await.unwrap();

        let first = next(&mut events).await;
        assert_eq!(first.event_type, "Score");
        assert_eq!(first.data, "1-0");

        let second = next(&mut events).await;
        assert_eq!(second.event_type, "message");
        assert_eq!(second.data, "hello");

        assert_eq!(client.run_state(), RunState::Started);
        assert_eq!(client.connection_state(), ConnectionState::Open);
        assert_eq!(client.stats().events_received, 2);

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_notifications_on_first_connect() {
        let (client, _connector) = client_with(vec![Step::Hold("")]);
        let mut states = record_states(&client);

        client.start(None, false).await.unwrap();

        assert_eq!(next(&mut states).await, StateChange::Run(RunState::Starting));
        assert_eq!(next(&mut states).await, StateChange::Run(RunState::Started));
        assert_eq!(
            next(&mut states).await,
            StateChange::Connection(ConnectionState::Opening)
        );
        assert_eq!(
            next(&mut states).await,
            StateChange::Connection(ConnectionState::Open)
        );

        client.stop().await.unwrap();

        assert_eq!(next(&mut states).await, StateChange::Run(RunState::Stopping));
        assert_eq!(
            next(&mut states).await,
            StateChange::Connection(ConnectionState::Closed)
        );
        assert_eq!(next(&mut states).await, StateChange::Run(RunState::Stopped));
        assert_eq!(client.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_stream_ends() {
        let (client, connector) = client_with(vec![
            Step::Send("id: 7\ndata: first\n\n"),
            Step::Fail,
            Step::Hold("data: second\n\n"),
        ]);
        let mut events = record_events(&client);
        let mut states = record_states(&client);

        client.start(None, false).await.unwrap();

        assert_eq!(next(&mut events).await.data, "first");
        wait_for(
            &mut states,
            StateChange::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_millis(100),
            },
        )
        .await;
        wait_for(
            &mut states,
            StateChange::ReconnectScheduled {
                attempt: 2,
                delay: Duration::from_millis(200),
            },
        )
        .await;
        wait_for(&mut states, StateChange::Reconnected { attempts: 2 }).await;
        assert_eq!(next(&mut events).await.data, "second");

        let requests = connector.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].last_event_id, None);
        assert_eq!(requests[1].last_event_id.as_deref(), Some("7"));
        assert_eq!(requests[2].last_event_id.as_deref(), Some("7"));

        let stats = client.stats();
        assert_eq!(stats.connection_attempts, 3);
        assert_eq!(stats.connections_opened, 2);
        assert_eq!(stats.reconnects, 1);

        client.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopening_notified_once_per_outage() {
        let (client, _connector) =
            client_with(vec![Step::Fail, Step::Fail, Step::Fail, Step::Hold("")]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.subscribe_state(move |change| {
            if let StateChange::Connection(state) = change {
                let _ = tx.send(*state);
            }
        });

        client.start(None, false).await.unwrap();

        assert_eq!(next(&mut rx).await, ConnectionState::Opening);
        assert_eq!(next(&mut rx).await, ConnectionState::Closed);
        assert_eq!(next(&mut rx).await, ConnectionState::Reopening);
        assert_eq!(next(&mut rx).await, ConnectionState::Reopened);

        client.stop().await.unwrap();
        assert_eq!(next(&mut rx).await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_stop_start_keeps_single_stream() {
        let (client, connector) = client_with(vec![Step::Hold(""), Step::Hold("")]);
        let mut states = record_states(&client);

        client.start(None, false).await.unwrap();
        wait_for(&mut states, StateChange::Connection(ConnectionState::Open)).await;

        client.stop().await.unwrap();
        assert_eq!(connector.open.load(Ordering::SeqCst), 0);
        assert_eq!(client.run_state(), RunState::Stopped);

        client.start(None, false).await.unwrap();
        wait_for(&mut states, StateChange::Connection(ConnectionState::Open)).await;

        assert_eq!(connector.open.load(Ordering::SeqCst), 1);
        assert_eq!(connector.max_open.load(Ordering::SeqCst), 1);

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_interrupts_pending_connect() {
        let (client, _connector) = client_with(vec![Step::Hang]);
        let mut states = record_states(&client);

        client.start(None, false).await.unwrap();
        wait_for(&mut states, StateChange::Connection(ConnectionState::Opening)).await;

        client.stop().await.unwrap();
        assert_eq!(client.run_state(), RunState::Stopped);
        assert_eq!(client.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_stop_when_not_started_is_noop() {
        let (client, _connector) = client_with(vec![]);

        client.stop().await.unwrap();
        assert_eq!(client.run_state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn test_same_url_is_noop() {
        let (client, connector) = client_with(vec![Step::Hold(""), Step::Hold("")]);
        let mut states = record_states(&client);

        client.start(None, false).await.unwrap();
        wait_for(&mut states, StateChange::Connection(ConnectionState::Open)).await;

        client
            .start(Some("http://scores.test/stream"), true)
            .await
            .unwrap();

        assert_eq!(connector.requests.lock().unwrap().len(), 1);
        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_different_url_ignored_without_restart() {
        let (client, _connector) = client_with(vec![Step::Hold("")]);

        client.start(None, false).await.unwrap();
        client.start(Some("other"), false).await.unwrap();

        assert_eq!(
            client.current_url().await.unwrap().as_str(),
            "http://scores.test/stream"
        );
        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_different_url_restarts() {
        let (client, connector) = client_with(vec![Step::Hold(""), Step::Hold("")]);
        let mut states = record_states(&client);

        client.start(None, false).await.unwrap();
        wait_for(&mut states, StateChange::Connection(ConnectionState::Open)).await;

        client.start(Some("other"), true).await.unwrap();
        wait_for(&mut states, StateChange::Connection(ConnectionState::Open)).await;

        assert_eq!(
            client.current_url().await.unwrap().as_str(),
            "http://scores.test/other"
        );
        let requests = connector.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url.as_str(), "http://scores.test/other");
        assert_eq!(connector.max_open.load(Ordering::SeqCst), 1);

        client.stop().await.unwrap();
        assert!(client.current_url().await.is_none());
    }

    #[tokio::test]
    async fn test_disposed_client_rejects_lifecycle_calls() {
        let (client, _connector) = client_with(vec![Step::Hold("")]);
        client.subscribe("Score", |_| {}).unwrap();

        client.start(None, false).await.unwrap();
        client.dispose().await;

        assert!(client.is_disposed());
        assert_eq!(client.run_state(), RunState::Stopped);
        assert!(client.subscriptions().is_empty());
        assert!(matches!(client.start(None, false).await, Err(Error::Disposed)));
        assert!(matches!(client.stop().await, Err(Error::Disposed)));

        // Second dispose is harmless
        client.dispose().await;
    }

    #[tokio::test]
    async fn test_drop_cancels_loop() {
        let (client, connector) = client_with(vec![Step::Hold("")]);
        let mut states = record_states(&client);

        client.start(None, false).await.unwrap();
        wait_for(&mut states, StateChange::Connection(ConnectionState::Open)).await;

        drop(client);
        for _ in 0..100 {
            if connector.open.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(connector.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auto_start() {
        let connector = Arc::new(ScriptedConnector::new(vec![Step::Hold("data: auto\n\n")]));
        let client =
            SseClient::with_connector(test_config().auto_start(true), Arc::clone(&connector))
                .unwrap();
        let mut events = record_events(&client);

        assert_eq!(next(&mut events).await.data, "auto");
        assert_eq!(client.run_state(), RunState::Started);

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_timeout_counts_as_failure() {
        let connector = Arc::new(ScriptedConnector::new(vec![Step::Hang, Step::Hold("")]));
        let config = test_config().connect_timeout(Duration::from_millis(50));
        let client = SseClient::with_connector(config, Arc::clone(&connector)).unwrap();
        let mut states = record_states(&client);

        client.start(None, false).await.unwrap();
        wait_for(&mut states, StateChange::Reconnected { attempts: 1 }).await;

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_split_across_reads() {
        let (client, _connector) = client_with(vec![
            Step::Chunks(vec!["event: Sco", "re\ndata: 1", "-0\n\n", "data: two\r\n\r\n"]),
            Step::Hold(""),
        ]);
        let mut events = record_events(&client);

        client.start(None, false).await.unwrap();

        let first = next(&mut events).await;
        assert_eq!(first.event_type, "Score");
        assert_eq!(first.data, "1-0");

        let second = next(&mut events).await;
        assert_eq!(second.event_type, "message");
        assert_eq!(second.data, "two");

        client.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_connection_state_moves_only_once_started() {
        const CYCLES: usize = 50;

        let (client, _connector) = client_with((0..CYCLES).map(|_| Step::Hold("")).collect());
        let mut states = record_states(&client);

        for _ in 0..CYCLES {
            client.start(None, false).await.unwrap();

            let mut run = None;
            loop {
                match next(&mut states).await {
                    StateChange::Run(state) => run = Some(state),
                    StateChange::Connection(ConnectionState::Opening) => {
                        assert_eq!(run, Some(RunState::Started));
                    }
                    StateChange::Connection(ConnectionState::Open) => break,
                    _ => {}
                }
            }

            client.stop().await.unwrap();
            wait_for(&mut states, StateChange::Run(RunState::Stopped)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_gives_up_on_stuck_loop() {
        let stop_timeout = Duration::from_millis(100);
        let connector = Arc::new(ScriptedConnector::new(vec![Step::Hold("data: slow\n\n")]));
        let config = test_config().stop_timeout(stop_timeout);
        let client = SseClient::with_connector(config, connector).unwrap();

        let (tx, mut entered) = mpsc::unbounded_channel();
        client.subscribe_all(move |_| {
            let _ = tx.send(());
            // Blocks the loop where cancellation cannot reach it
            std::thread::sleep(Duration::from_secs(2));
        });

        client.start(None, false).await.unwrap();
        next(&mut entered).await;

        let begun = std::time::Instant::now();
        client.stop().await.unwrap();
        let elapsed = begun.elapsed();

        assert!(elapsed >= stop_timeout);
        assert!(elapsed < Duration::from_secs(1), "stop took {:?}", elapsed);
        assert_eq!(client.run_state(), RunState::Stopped);
        assert_eq!(client.connection_state(), ConnectionState::Closed);
        assert!(client.current_url().await.is_none());
    }
}
