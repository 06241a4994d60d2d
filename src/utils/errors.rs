// src/utils/errors.rs
//! Error types for the gateway
//!
//! Every failure is scoped to a single relay session except `Bind`, which is
//! the only condition fatal to the process.

use std::net::SocketAddr;
use thiserror::Error;

/// Result type used across the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Relay direction, used to attribute mid-stream I/O failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to destination (counts toward bytes sent)
    Upstream,

    /// Destination to client (counts toward bytes received)
    Downstream,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upstream => f.write_str("client->destination"),
            Direction::Downstream => f.write_str("destination->client"),
        }
    }
}

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Original destination could not be recovered from the kernel
    #[error("Original destination unavailable: {0}")]
    Resolution(String),

    /// Destination unreachable or connect timed out
    #[error("Outbound connection to {addr} failed: {source}")]
    OutboundConnect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Read/write failure on one relay direction
    #[error("Relay I/O error ({direction}): {source}")]
    RelayIo {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    /// Persisting a finished session failed
    #[error("Accounting failed: {0}")]
    Accounting(String),

    /// Listening socket could not be set up
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        GatewayError::Storage(e.to_string())
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(e: config::ConfigError) -> Self {
        GatewayError::Config(e.to_string())
    }
}

impl GatewayError {
    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Resolution(_) => "resolution",
            GatewayError::OutboundConnect { .. } => "connect",
            GatewayError::RelayIo { .. } => "relay_io",
            GatewayError::Accounting(_) => "accounting",
            GatewayError::Bind { .. } => "bind",
            GatewayError::Config(_) => "config",
            GatewayError::Storage(_) => "storage",
            GatewayError::Internal(_) => "internal",
        }
    }
}
