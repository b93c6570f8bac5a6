//! Error types
//!
//! Transport faults never surface here: the reconnect loop absorbs them and
//! reports them through `ConnectionState`. Only configuration, start-time
//! and lifecycle misuse errors reach the caller.

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure (server bind, transport setup)
    Io(io::Error),
    /// Configuration rejected at validation time
    Config(ConfigError),
    /// Caller supplied an unusable argument (missing URL, empty event type)
    InvalidArgument(String),
    /// The client was disposed and can no longer be started or stopped
    Disposed,
    /// A published message could not be serialized
    Serialization(serde_json::Error),
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Reconnect base delay must be greater than zero
    NonPositiveBaseDelay,
    /// Reconnect max delay is smaller than the base delay
    MaxDelayBelowBase,
    /// Stop timeout must be greater than zero
    NonPositiveStopTimeout,
    /// Base address could not be parsed as an absolute URL
    InvalidBaseAddress(String),
    /// Request header name or value is not valid HTTP
    InvalidHeader(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Config(e) => write!(f, "Invalid configuration: {}", e),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Disposed => write!(f, "Client has been disposed"),
            Error::Serialization(e) => write!(f, "Serialization failed: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NonPositiveBaseDelay => {
                write!(f, "reconnect base delay must be positive")
            }
            ConfigError::MaxDelayBelowBase => {
                write!(f, "reconnect max delay must not be below the base delay")
            }
            ConfigError::NonPositiveStopTimeout => write!(f, "stop timeout must be positive"),
            ConfigError::InvalidBaseAddress(addr) => write!(f, "invalid base address: {}", addr),
            ConfigError::InvalidHeader(name) => write!(f, "invalid request header: {}", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e)
    }
}
