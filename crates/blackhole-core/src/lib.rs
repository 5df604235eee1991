//! blackhole-core: Shared library for the blackhole wire protocol and policy.
//!
//! This crate provides:
//! - Frame definitions and the dual binary/JSON codec
//! - Protocol, timing, and sizing constants
//! - The shared error type
//! - Reconnect backoff policy
//! - Logging setup

pub mod backoff;
pub mod constants;
pub mod error;
pub mod logging;
pub mod protocol;

pub use backoff::ReconnectBackoff;
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
