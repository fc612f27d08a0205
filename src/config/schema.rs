//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a cluster
//! node. All types derive Serde traits for deserialization from config
//! files.

use serde::Deserialize;

use crate::cluster::StickySpec;
use crate::store::DatabaseConfig;

/// Root configuration for a cluster node.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NodeConfig {
    /// Listener configuration (bind address, concurrency ceiling).
    pub listener: ListenerConfig,

    /// Cluster membership settings.
    pub cluster: ClusterConfig,

    /// Mapping-store backend settings.
    pub database: DatabaseConfig,

    /// Retry policy for transient storage failures.
    pub retry: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Route definitions served by this node.
    pub routes: Vec<RouteConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// In-flight request ceiling used as the load denominator: load is
    /// reported as in-flight / ceiling * 100.
    pub max_concurrent: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_concurrent: 1_000,
        }
    }
}

/// Cluster membership settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Disable to run the node standalone (every request handled locally,
    /// nothing persisted).
    pub enabled: bool,

    /// Pool/class of this node (e.g. "encoder"); selection and ownership
    /// are scoped per type.
    pub server_type: String,

    /// Address peers use to reach this node (host:port). Defaults to the
    /// listener bind address when unset; must be set when binding to a
    /// wildcard address.
    pub advertise_address: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_type: "worker".to_string(),
            advertise_address: None,
        }
    }
}

/// Retry policy for transient storage failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts for the lookup/claim sequence.
    pub attempts: u32,

    /// Fixed delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 10,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds,
    /// applied to local handling and proxy hops alike.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// One logical route/endpoint served by the node.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Endpoint name; carries the per-endpoint uniqueness constraint on
    /// sticky values and must be unique within the config.
    pub name: String,

    /// Path prefix this route matches.
    pub path_prefix: String,

    /// Sticky-key specification: a parameter name, a tuple of parameter
    /// names, or a nested list of either. Absent means no stickiness.
    #[serde(default)]
    pub sticky: Option<StickySpec>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl NodeConfig {
    /// The address this node registers under and peers proxy to.
    pub fn advertise_address(&self) -> &str {
        self.cluster
            .advertise_address
            .as_deref()
            .unwrap_or(&self.listener.bind_address)
    }
}
