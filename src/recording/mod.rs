// src/recording/mod.rs
//! Traffic accounting and storage
//!
//! - **Records**: `ConnectionRecord` / `DeviceRecord` contracts
//! - **Storage**: SQLite persistence shared with the reporting side
//! - **Accounting**: Turns finished relay sessions into records
//!
//! # Architecture
//!
//! ```text
//! Relay Session (finished)
//!         │
//!         ▼
//! AccountingSink::settle()
//!         │
//!         ▼  one transaction
//! ┌───────────────────────────────┐
//! │ INSERT connections            │
//! │ UPSERT devices (by source IP) │
//! └───────────────────────────────┘
//! ```

pub mod accounting;
pub mod records;
pub mod storage;

// Re-export commonly used types
pub use accounting::AccountingSink;
pub use records::{ConnectionRecord, ConnectionStatus, DeviceRecord, UNRESOLVED_MAC};
pub use storage::{SourceTotals, TrafficStore};
