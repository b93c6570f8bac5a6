//! Event stream route
//!
//! Each `GET` on the configured path takes its own queue subscription and
//! answers with an `text/event-stream` body that ends when the client hangs
//! up, the queue closes or the server shuts down.

use std::borrow::Cow;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{future, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broadcast::{BroadcastQueue, QueueMessage};
use crate::protocol::SseEvent;
use crate::server::config::ServerConfig;
use crate::stats::ServerMetrics;

/// Comment sent on an idle stream
const KEEP_ALIVE_COMMENT: &str = "keep-alive";

/// Stops reverse proxies from buffering the stream
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Shared by every request on the route
#[derive(Clone)]
pub(crate) struct StreamState {
    pub(crate) queue: Arc<BroadcastQueue>,
    pub(crate) metrics: Arc<ServerMetrics>,
    keep_alive: Option<Duration>,
    allow_origin: Option<HeaderValue>,
    connections: Option<Arc<Semaphore>>,
    next_session_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl StreamState {
    pub(crate) fn new(config: &ServerConfig, queue: Arc<BroadcastQueue>) -> Self {
        let allow_origin = config.cors_allow_origin.as_deref().and_then(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| tracing::warn!(origin = %origin, "Ignoring invalid CORS origin"))
                .ok()
        });

        let connections = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            queue,
            metrics: Arc::new(ServerMetrics::new()),
            keep_alive: config.keep_alive_interval,
            allow_origin,
            connections,
            next_session_id: Arc::new(AtomicU64::new(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Same state, with streams ending when `shutdown` fires
    pub(crate) fn with_shutdown(&self, shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            ..self.clone()
        }
    }

    fn add_cors(&self, headers: &mut HeaderMap) {
        if let Some(origin) = &self.allow_origin {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        }
    }
}

/// Mount the stream route on `path`
pub(crate) fn router(path: &str, state: StreamState) -> Router {
    Router::new()
        .route(path, get(stream_events).options(preflight))
        .with_state(state)
}

async fn stream_events(State(state): State<StreamState>) -> Response {
    let permit = match &state.connections {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                state.metrics.request_rejected();
                tracing::warn!("Stream rejected: connection limit reached");
                let mut response = (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(header::RETRY_AFTER, "1")],
                    "connection limit reached",
                )
                    .into_response();
                state.add_cors(response.headers_mut());
                return response;
            }
        },
        None => None,
    };

    let session_id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
    let subscription = state.queue.subscribe();

    state.metrics.connection_opened();
    tracing::info!(
        session_id = session_id,
        subscriber_id = subscription.id(),
        "Event stream opened"
    );

    let session = Session {
        id: session_id,
        metrics: Arc::clone(&state.metrics),
        _permit: permit,
    };

    let events = subscription
        .into_stream(state.shutdown.child_token())
        .filter_map(move |message| future::ready(session.frame(&message).map(Ok::<_, Infallible>)));

    let sse = Sse::new(events);
    let mut response = match state.keep_alive {
        Some(interval) => sse
            .keep_alive(KeepAlive::new().interval(interval).text(KEEP_ALIVE_COMMENT))
            .into_response(),
        None => sse.into_response(),
    };

    let headers = response.headers_mut();
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    state.add_cors(headers);
    response
}

async fn preflight(State(state): State<StreamState>) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(header::ALLOW, HeaderValue::from_static("GET, HEAD, OPTIONS"));

    if state.allow_origin.is_some() {
        state.add_cors(headers);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("last-event-id, cache-control, accept"),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    }

    response
}

/// Lives as long as the response body
struct Session {
    id: u64,
    metrics: Arc<ServerMetrics>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Session {
    fn frame(&self, message: &QueueMessage) -> Option<Event> {
        let event = message.to_event(Uuid::new_v4().to_string());
        let frame = to_frame(&event);
        if frame.is_none() {
            tracing::warn!(
                session_id = self.id,
                event_type = %event.event_type,
                "Skipping event that cannot be framed"
            );
        }
        frame
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.metrics.connection_closed();
        tracing::info!(session_id = self.id, "Event stream closed");
    }
}

/// Build a wire frame, or None when the type or id would break framing
///
/// Line breaks inside the data become separate `data:` lines.
pub(crate) fn to_frame(event: &SseEvent) -> Option<Event> {
    if event.event_type.contains(['\r', '\n']) {
        return None;
    }
    if let Some(id) = &event.id {
        if id.contains(['\r', '\n', '\0']) {
            return None;
        }
    }

    let data: Cow<'_, str> = if event.data.contains('\r') {
        Cow::Owned(event.data.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(&event.data)
    };

    let frame = Event::default().event(&event.event_type).data(data);
    Some(match &event.id {
        Some(id) => frame.id(id),
        None => frame,
    })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request};
    use bytes::BytesMut;
    use futures_util::Stream;
    use tower::ServiceExt;

    use super::*;
    use crate::protocol::SseDecoder;

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn next_chunk<S, E>(body: &mut S) -> Option<bytes::Bytes>
    where
        S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
        E: std::fmt::Debug,
    {
        tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("timed out")
            .map(|chunk| chunk.unwrap())
    }

    async fn next_event<S, E>(body: &mut S, decoder: &mut SseDecoder) -> SseEvent
    where
        S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
        E: std::fmt::Debug,
    {
        let mut buf = BytesMut::new();
        loop {
            if let Some(event) = decoder.decode(&mut buf) {
                return event;
            }
            let chunk = next_chunk(body).await.expect("stream ended");
            buf.extend_from_slice(&chunk);
        }
    }

    #[tokio::test]
    async fn test_streams_published_messages() {
        let queue = Arc::new(BroadcastQueue::new());
        let config = ServerConfig::default().cors_allow_origin("*");
        let app = router("/events", StreamState::new(&config, Arc::clone(&queue)));

        let response = app.oneshot(request(Method::GET, "/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers()["x-accel-buffering"], "no");
        assert_eq!(queue.subscriber_count(), 1);

        queue.publish_raw("Score", "1-0\r\n2-0");

        let mut body = response.into_body().into_data_stream();
        let mut decoder = SseDecoder::new();
        let event = next_event(&mut body, &mut decoder).await;
        assert_eq!(event.event_type, "Score");
        assert_eq!(event.data, "1-0\n2-0");
        assert!(event.id.is_some_and(|id| Uuid::parse_str(&id).is_ok()));

        drop(body);
        assert_eq!(queue.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let queue = Arc::new(BroadcastQueue::new());
        let app = router("/events", StreamState::new(&ServerConfig::default(), queue));

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(request(Method::POST, "/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let allow = response.headers()[header::ALLOW].to_str().unwrap();
        assert!(allow.contains("GET"));
    }

    #[tokio::test]
    async fn test_preflight() {
        let queue = Arc::new(BroadcastQueue::new());

        let plain = router("/events", StreamState::new(&ServerConfig::default(), Arc::clone(&queue)));
        let response = plain.oneshot(request(Method::OPTIONS, "/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ALLOW], "GET, HEAD, OPTIONS");
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());

        let config = ServerConfig::default().cors_allow_origin("https://scores.example");
        let cors = router("/events", StreamState::new(&config, Arc::clone(&queue)));
        let response = cors.oneshot(request(Method::OPTIONS, "/events")).await.unwrap();
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://scores.example"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
        assert!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()
            .unwrap()
            .contains("last-event-id"));

        // Preflight never subscribes
        assert_eq!(queue.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_limit_answers_503() {
        let queue = Arc::new(BroadcastQueue::new());
        let config = ServerConfig::default().max_connections(1);
        let state = StreamState::new(&config, Arc::clone(&queue));
        let metrics = Arc::clone(&state.metrics);
        let app = router("/events", state);

        let first = app
            .clone()
            .oneshot(request(Method::GET, "/events"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .clone()
            .oneshot(request(Method::GET, "/events"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(second.headers()[header::RETRY_AFTER], "1");

        let stats = metrics.snapshot();
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.rejected_requests, 1);

        // Dropping the body releases the slot
        drop(first);
        let third = app.oneshot(request(Method::GET, "/events")).await.unwrap();
        assert_eq!(third.status(), StatusCode::OK);

        let stats = metrics.snapshot();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_connections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_gets_keep_alive() {
        let queue = Arc::new(BroadcastQueue::new());
        let config = ServerConfig::default().keep_alive(Some(Duration::from_secs(1)));
        let app = router("/events", StreamState::new(&config, queue));

        let response = app.oneshot(request(Method::GET, "/events")).await.unwrap();
        let mut body = response.into_body().into_data_stream();

        let chunk = next_chunk(&mut body).await.expect("stream ended");
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.starts_with(':'));
        assert!(text.contains(KEEP_ALIVE_COMMENT));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn test_shutdown_ends_body() {
        let queue = Arc::new(BroadcastQueue::new());
        let shutdown = CancellationToken::new();
        let state = StreamState::new(&ServerConfig::default(), Arc::clone(&queue))
            .with_shutdown(shutdown.clone());
        let metrics = Arc::clone(&state.metrics);
        let app = router("/events", state);

        let response = app.oneshot(request(Method::GET, "/events")).await.unwrap();
        let mut body = response.into_body().into_data_stream();

        shutdown.cancel();
        while next_chunk(&mut body).await.is_some() {}

        drop(body);
        assert_eq!(queue.subscriber_count(), 0);
        assert_eq!(metrics.snapshot().active_connections, 0);
    }

    #[test]
    fn test_to_frame_rejects_broken_framing() {
        assert!(to_frame(&SseEvent::new("Score\nevil", "1-0")).is_none());
        assert!(to_frame(&SseEvent::new("Score", "1-0").with_id("a\rb")).is_none());
        assert!(to_frame(&SseEvent::new("Score", "1-0").with_id("a\0b")).is_none());
        assert!(to_frame(&SseEvent::new("Score", "1-0\r2-0").with_id("7")).is_some());
    }
}
