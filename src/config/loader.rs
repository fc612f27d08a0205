//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::NodeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<NodeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: NodeConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::StickySpec;
    use std::io::Write;

    #[test]
    fn full_config_round_trip() {
        let toml = r#"
            [listener]
            bind_address = "127.0.0.1:4100"
            max_concurrent = 64

            [cluster]
            server_type = "encoder"
            advertise_address = "127.0.0.1:4100"

            [database]
            backend = "sqlite"
            path = "/tmp/pool.db"

            [retry]
            attempts = 5
            delay_ms = 20

            [[routes]]
            name = "publish"
            path_prefix = "/publish"
            sticky = "channel"

            [[routes]]
            name = "join"
            path_prefix = "/join"
            sticky = ["tenant", "channel"]
        "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.cluster.server_type, "encoder");
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.routes.len(), 2);
        assert!(matches!(
            config.routes[1].sticky,
            Some(StickySpec::Tuple(ref t)) if t == &["tenant", "channel"]
        ));
    }

    #[test]
    fn invalid_config_reports_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[retry]\nattempts = 0\n").unwrap();
        // Defaults leave the wildcard bind in place too.
        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => assert!(!errors.is_empty()),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }
}
