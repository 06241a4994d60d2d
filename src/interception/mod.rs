// src/interception/mod.rs
//! Transparent interception layer
//!
//! - **Original Destination**: Recovers the pre-redirect address (`SO_ORIGINAL_DST`)
//! - **Listener**: Transparent accept loop, one task per connection
//! - **Relay**: Outbound connect and bidirectional byte pump with counters
//! - **Registry**: Snapshot view of in-flight sessions
//!
//! # Architecture
//!
//! ```text
//! Client ──(iptables REDIRECT / TPROXY)──► TransparentListener
//!                                              │ accept
//!                                              ▼
//!                                         RelaySession
//!                                              │ SO_ORIGINAL_DST
//!                                              ▼
//!                                         connect(original dst, 10s)
//!                                              │
//!                          client ◄──pump──► destination
//!                                              │ both directions ended
//!                                              ▼
//!                                         AccountingSink
//! ```

pub mod listener;
pub mod original_dst;
pub mod registry;
pub mod relay;

// Re-export commonly used types
pub use listener::TransparentListener;
pub use original_dst::{DestinationResolver, OriginalDstResolver, StaticResolver};
pub use registry::{ActiveSession, SessionRegistry};
pub use relay::{
    ConnectFuture, FinishedSession, OutboundConnector, RelayConfig, RelaySession, SessionState,
    TcpConnector,
};
