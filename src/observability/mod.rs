//! Observability subsystem.
//!
//! # Design Decisions
//! - Structured logging via `tracing`; request IDs are attached by the
//!   HTTP layer and flow through the spans
//! - Metrics are cheap counters/histograms behind the `metrics` facade,
//!   exposed through a Prometheus scrape endpoint when enabled

pub mod logging;
pub mod metrics;
