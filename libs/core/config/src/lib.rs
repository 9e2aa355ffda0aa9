pub mod tracing;

use std::env;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("Invalid plugin parameters: {0}")]
    InvalidParams(String),
}

/// Application environment (dev = local, prod = deployed)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load and parse environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load and parse environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// The single environment input of the collection core: the path under which
/// the orchestrator keeps its YAML configuration tree.
pub const CONFIG_ROOT_VAR: &str = "CONFIG_ROOT";

/// Returns the configuration root directory from the environment.
pub fn config_root() -> Result<PathBuf, ConfigError> {
    env_required(CONFIG_ROOT_VAR).map(PathBuf::from)
}

/// Deserializes a free-form plugin parameter block strictly.
///
/// The orchestrator hands each plugin its parameter block as an already
/// parsed JSON value; plugins declare a `Deserialize` struct with
/// `deny_unknown_fields` and run it through here, so a typo in the
/// configuration surfaces as a hard error instead of a silently ignored key.
pub fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, ConfigError> {
    serde_json::from_value(params).map_err(|err| ConfigError::InvalidParams(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Production);
        });
    }

    #[test]
    fn test_config_root_requires_env_var() {
        temp_env::with_var_unset(CONFIG_ROOT_VAR, || {
            assert!(config_root().is_err());
        });
        temp_env::with_var(CONFIG_ROOT_VAR, Some("/etc/collector"), || {
            assert_eq!(config_root().unwrap(), PathBuf::from("/etc/collector"));
        });
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Params {
        region: String,
    }

    #[test]
    fn test_parse_params_rejects_unknown_fields() {
        let ok: Params = parse_params(serde_json::json!({"region": "eu-de-1"})).unwrap();
        assert_eq!(ok.region, "eu-de-1");

        let err = parse_params::<Params>(serde_json::json!({"region": "eu-de-1", "bogus": 1}));
        assert!(err.is_err());
    }
}
