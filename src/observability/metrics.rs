//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sticky_resolve_total` (counter): resolutions by outcome
//!   (`local`, `proxied`, `no_capacity`, `error`)
//! - `sticky_proxy_total` (counter): forwarded requests by upstream status
//! - `sticky_flush_values` (histogram): claim batch size per flush

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus scrape endpoint on the given address.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics endpoint started"),
        Err(err) => tracing::error!(error = %err, "failed to start metrics endpoint"),
    }
}

pub fn record_resolve(outcome: &'static str) {
    counter!("sticky_resolve_total", "outcome" => outcome).increment(1);
}

pub fn record_proxy(status: u16) {
    counter!("sticky_proxy_total", "status" => status.to_string()).increment(1);
}

pub fn record_flush(values: usize) {
    histogram!("sticky_flush_values").record(values as f64);
}
