//! Proxy forwarding subsystem.
//!
//! Relays requests whose sticky values belong to a different node. A failed
//! hop fails the request; falling back to local handling would break the
//! affinity guarantee.

pub mod forwarder;

pub use forwarder::{ForwardError, ProxyForwarder};
