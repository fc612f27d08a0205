//! Lifecycle management subsystem.
//!
//! # Design Decisions
//! - Ordered startup: config, store registration, then the listener
//! - Shutdown drains in-flight requests before the process exits; claim
//!   rows stay in the store so a restarted node can recover them

pub mod shutdown;

pub use shutdown::Shutdown;
