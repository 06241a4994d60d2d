// src/recording/records.rs
//! Persisted record types
//!
//! A `ConnectionRecord` is the immutable snapshot of one finished relay
//! session. A `DeviceRecord` aggregates every session attributed to one
//! source address.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Placeholder hardware address until MAC/ARP correlation fills it in
pub const UNRESOLVED_MAC: &str = "unknown";

/// Terminal status of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Closed,
    Timeout,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Closed => "closed",
            ConnectionStatus::Timeout => "timeout",
            ConnectionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(ConnectionStatus::Closed),
            "timeout" => Some(ConnectionStatus::Timeout),
            "error" => Some(ConnectionStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finished connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// When the session started connecting outbound
    pub timestamp: DateTime<Utc>,

    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,

    /// Resolved destination name, if known
    pub dst_domain: Option<String>,

    /// Client to destination
    pub bytes_sent: u64,

    /// Destination to client
    pub bytes_received: u64,

    pub duration_seconds: f64,
    pub status: ConnectionStatus,
}

/// Per-device aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Hardware address, `UNRESOLVED_MAC` until correlated
    pub mac_address: String,
    pub ip_address: IpAddr,
    pub hostname: Option<String>,

    /// User-assigned name, edited by the reporting side
    pub assigned_name: Option<String>,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub connection_count: u64,
}

impl DeviceRecord {
    pub fn is_resolved(&self) -> bool {
        self.mac_address != UNRESOLVED_MAC
    }
}
