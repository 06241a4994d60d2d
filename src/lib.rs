// src/lib.rs
//! Traffic Gateway Library
//!
//! Transparent TCP interception for a network gateway: connections
//! redirected by the kernel are relayed unmodified to their original
//! destination while bytes and durations are counted, and every finished
//! connection is persisted together with per-device aggregates.
//!
//! # Architecture
//!
//! - **interception**: Transparent listener, original-destination recovery,
//!   relay sessions and the in-flight session registry
//! - **recording**: Connection/device records, SQLite store, accounting sink
//! - **observability**: Tracing and metrics setup
//! - **utils**: Configuration and errors
//!
//! Device identity is keyed by source IP. Hardware addresses are left as
//! `unknown` until an external MAC/ARP correlator fills them in, so devices
//! behind NAT or DHCP churn may collapse into one record.

// Public module exports
pub mod interception;
pub mod observability;
pub mod recording;
pub mod utils;

// Re-export commonly used types
pub use interception::{RelaySession, TransparentListener};
pub use recording::{AccountingSink, TrafficStore};
pub use utils::config::GatewayConfig;
pub use utils::errors::{GatewayError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
