//! Resilience subsystem.
//!
//! # Design Decisions
//! - Retries apply to transient storage failures only (lock timeouts,
//!   serialization conflicts), never to ownership conflicts
//! - Proxy transport failures are not retried here; affinity means the
//!   request must fail rather than run on the wrong node

pub mod retry;

pub use retry::{retry_transient, RetryPolicy};
