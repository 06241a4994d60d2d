// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::{GatewayConfig, LogFormat};
pub use errors::{Direction, GatewayError, Result};
