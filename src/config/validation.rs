//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: NodeConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::NodeConfig;

/// One semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn err(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Semantic checks on top of serde's syntactic parsing.
pub fn validate_config(config: &NodeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(err(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.max_concurrent == 0 {
        errors.push(err("listener.max_concurrent", "must be at least 1"));
    }

    if config.cluster.enabled {
        if config.cluster.server_type.trim().is_empty() {
            errors.push(err("cluster.server_type", "must not be empty"));
        }
        let advertise = config.advertise_address();
        match advertise.parse::<SocketAddr>() {
            Ok(addr) if addr.ip().is_unspecified() => {
                errors.push(err(
                    "cluster.advertise_address",
                    "peers cannot reach a wildcard address; set an explicit one",
                ));
            }
            Ok(_) => {}
            Err(_) => {
                errors.push(err(
                    "cluster.advertise_address",
                    format!("not a socket address: {advertise}"),
                ));
            }
        }
    }

    if config.retry.attempts == 0 {
        errors.push(err("retry.attempts", "must be at least 1"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(err("timeouts.request_secs", "must be at least 1"));
    }

    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();
    for route in &config.routes {
        if route.name.trim().is_empty() {
            errors.push(err("routes.name", "must not be empty"));
        }
        if !names.insert(route.name.as_str()) {
            errors.push(err("routes.name", format!("duplicate route: {}", route.name)));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(err(
                "routes.path_prefix",
                format!("must start with '/': {}", route.path_prefix),
            ));
        }
        if !prefixes.insert(route.path_prefix.as_str()) {
            errors.push(err(
                "routes.path_prefix",
                format!("duplicate prefix: {}", route.path_prefix),
            ));
        }
        if route.path_prefix.starts_with("/cluster") {
            errors.push(err(
                "routes.path_prefix",
                "the /cluster prefix is reserved for node endpoints",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    fn valid() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.listener.bind_address = "127.0.0.1:8080".into();
        config.cluster.advertise_address = Some("127.0.0.1:8080".into());
        config.routes = vec![RouteConfig {
            name: "publish".into(),
            path_prefix: "/publish".into(),
            sticky: None,
        }];
        config
    }

    #[test]
    fn accepts_a_valid_config() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = valid();
        config.cluster.server_type = "".into();
        config.retry.attempts = 0;
        config.routes.push(RouteConfig {
            name: "publish".into(),
            path_prefix: "cluster".into(),
            sticky: None,
        });
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 4);
    }

    #[test]
    fn default_config_cannot_register_a_wildcard_identity() {
        // The stock defaults bind 0.0.0.0 with clustering on; they must
        // not pass unvalidated into registration.
        let errors = validate_config(&NodeConfig::default()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "cluster.advertise_address"));
    }

    #[test]
    fn rejects_wildcard_advertise_address() {
        let mut config = valid();
        config.cluster.advertise_address = None;
        config.listener.bind_address = "0.0.0.0:8080".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "cluster.advertise_address"));
    }

    #[test]
    fn reserved_prefix_is_rejected() {
        let mut config = valid();
        config.routes[0].path_prefix = "/cluster/status".into();
        assert!(validate_config(&config).is_err());
    }
}
