//! Transport seam
//!
//! The reconnect loop only needs "open a byte stream for this URL". The
//! [`StreamConnector`] trait captures that; [`HttpConnector`] implements it
//! over `reqwest`. A connect is cancelled by dropping its future, and every
//! failure is treated as retryable.

use std::future::Future;
use std::io;
use std::pin::Pin;

use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use url::Url;

use crate::error::{ConfigError, Result};
use crate::protocol::constants::{CONTENT_TYPE, LAST_EVENT_ID_HEADER};

use super::config::ClientConfig;

/// Raw event-stream body
pub type EventByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Parameters of one connect attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Fully resolved stream URL
    pub url: Url,
    /// Id of the last event seen on a previous connection
    pub last_event_id: Option<String>,
}

/// Opens event-stream byte streams
pub trait StreamConnector: Send + Sync + 'static {
    /// Open a stream for `request`
    fn connect(
        &self,
        request: &ConnectRequest,
    ) -> impl Future<Output = io::Result<EventByteStream>> + Send;
}

/// HTTP transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Build a connector from client configuration
    ///
    /// Sends `Accept: text/event-stream` plus the configured headers, and
    /// keeps a cookie store when `with_credentials` is set.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(CONTENT_TYPE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        for (name, value) in &config.request_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(config.with_credentials);

        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        let client = builder.build().map_err(io::Error::other)?;
        Ok(Self { client })
    }

    /// Wrap an existing `reqwest` client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl StreamConnector for HttpConnector {
    async fn connect(&self, request: &ConnectRequest) -> io::Result<EventByteStream> {
        let mut builder = self.client.get(request.url.clone());
        if let Some(id) = &request.last_event_id {
            builder = builder.header(LAST_EVENT_ID_HEADER, id.as_str());
        }

        let response = builder.send().await.map_err(io::Error::other)?;

        let status = response.status();
        if !status.is_success() {
            return Err(io::Error::other(format!(
                "unexpected response status {}",
                status
            )));
        }

        tracing::debug!(url = %request.url, status = status.as_u16(), "Event stream opened");

        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}
