use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_MAX_BODY_BYTES: &str = "1048576";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound on a request body, in bytes
    pub max_body_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "STOW_API_BIND_ADDR", DEFAULT_BIND_ADDR)
            .parse::<SocketAddr>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "STOW_API_BIND_ADDR must be a socket address such as 127.0.0.1:8787"
                        .to_string(),
                )
            })?;

        let max_body_bytes =
            value_or_default(&lookup, "STOW_API_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)
                .parse::<usize>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "STOW_API_MAX_BODY_BYTES must be an integer in [1024, 16777216]"
                            .to_string(),
                    )
                })?;
        if !(1_024..=16_777_216).contains(&max_body_bytes) {
            return Err(ConfigError::Invalid(
                "STOW_API_MAX_BODY_BYTES must be in [1024, 16777216]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            max_body_bytes,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            max_body_bytes: 1_048_576,
        }
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_defaults_to_local_bind_address() {
        let config = config_from(&HashMap::new()).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
    }

    #[test]
    fn config_rejects_invalid_bind_address() {
        let map = HashMap::from([("STOW_API_BIND_ADDR", "localhost")]);
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("STOW_API_BIND_ADDR"));
    }

    #[test]
    fn config_enforces_body_limit_range() {
        let map = HashMap::from([("STOW_API_MAX_BODY_BYTES", "12")]);
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("[1024, 16777216]"));

        let map = HashMap::from([
            ("STOW_API_BIND_ADDR", " 0.0.0.0:9000 "),
            ("STOW_API_MAX_BODY_BYTES", "4096"),
        ]);
        let config = config_from(&map).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.max_body_bytes, 4096);
    }
}
