pub mod redis;
pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment (dev = local, prod = deployed workers)
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

/// First variable that is set, in the given order
pub fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env::var(key).ok())
}

/// Parse an optional environment variable; unset yields `None`
pub fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::ParseError {
                key: key.to_string(),
                details: format!("{}", e),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_environment_unknown_defaults_to_development() {
        temp_env::with_var("APP_ENV", Some("staging"), || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
        });
    }

    #[test]
    fn test_env_first_respects_order() {
        temp_env::with_vars(
            [("FIRST_KEY", None::<&str>), ("SECOND_KEY", Some("second"))],
            || {
                assert_eq!(env_first(&["FIRST_KEY", "SECOND_KEY"]), Some("second".to_string()));
            },
        );
        temp_env::with_vars([("FIRST_KEY", Some("first")), ("SECOND_KEY", Some("second"))], || {
            assert_eq!(env_first(&["FIRST_KEY", "SECOND_KEY"]), Some("first".to_string()));
        });
    }

    #[test]
    fn test_env_parse() {
        temp_env::with_var("LEASE_SECS", Some(" 90 "), || {
            assert_eq!(env_parse::<u64>("LEASE_SECS").unwrap(), Some(90));
        });
        temp_env::with_var_unset("LEASE_SECS", || {
            assert_eq!(env_parse::<u64>("LEASE_SECS").unwrap(), None);
        });
        temp_env::with_var("LEASE_SECS", Some("soon"), || {
            let err = env_parse::<u64>("LEASE_SECS").unwrap_err();
            assert!(err.to_string().contains("LEASE_SECS"));
        });
    }
}
