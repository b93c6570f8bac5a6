//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Request path serving the event stream
    pub path: String,

    /// Maximum concurrent streams (0 = unlimited)
    pub max_connections: usize,

    /// Interval between keep-alive comments on an idle stream (None = never)
    pub keep_alive_interval: Option<Duration>,

    /// Value of `Access-Control-Allow-Origin` (None = header omitted)
    pub cors_allow_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/events".to_string(),
            max_connections: 0, // Unlimited
            keep_alive_interval: Some(Duration::from_secs(15)),
            cors_allow_origin: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the stream path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = with_leading_slash(path.into());
        self
    }

    /// Set maximum concurrent streams
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the keep-alive interval
    pub fn keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Allow cross-origin access from `origin`
    pub fn cors_allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_allow_origin = Some(origin.into());
        self
    }

    /// Path the stream route is mounted on
    pub(crate) fn route_path(&self) -> String {
        with_leading_slash(self.path.clone())
    }
}

fn with_leading_slash(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}
