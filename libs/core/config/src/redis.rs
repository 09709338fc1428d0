use crate::{ConfigError, FromEnv, env_first, env_parse};

/// Redis connection settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    /// Connection URL (e.g. "redis://127.0.0.1:6379")
    pub url: String,

    /// Database number, overrides any database in the URL path
    pub database: Option<u8>,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: None,
        }
    }

    pub fn with_database(mut self, database: u8) -> Self {
        self.database = Some(database);
        self
    }

    /// Full connection URL including the selected database
    ///
    /// `redis://host:6379` with database 2 becomes `redis://host:6379/2`.
    /// Query strings are kept.
    pub fn build_url(&self) -> String {
        let Some(database) = self.database else {
            return self.url.clone();
        };

        let (base, query) = match self.url.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (self.url.as_str(), None),
        };

        // Strip an existing "/<db>" after the authority
        let authority_start = base.find("://").map(|i| i + 3).unwrap_or(0);
        let base = match base[authority_start..].find('/') {
            Some(slash) => &base[..authority_start + slash],
            None => base,
        };

        match query {
            Some(query) => format!("{}/{}?{}", base, database, query),
            None => format!("{}/{}", base, database),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("redis://127.0.0.1:6379/15")
    }
}

impl FromEnv for RedisConfig {
    /// Environment variables:
    /// - `JOBQUEUE_REDIS_URL`, then `REDIS_URL`, then `REDIS_HOST` (required)
    /// - `REDIS_DATABASE` (optional)
    fn from_env() -> Result<Self, ConfigError> {
        let url = env_first(&["JOBQUEUE_REDIS_URL", "REDIS_URL", "REDIS_HOST"]).ok_or_else(|| {
            ConfigError::MissingEnvVar("JOBQUEUE_REDIS_URL, REDIS_URL or REDIS_HOST".to_string())
        })?;

        Ok(Self {
            url,
            database: env_parse("REDIS_DATABASE")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 4] = ["JOBQUEUE_REDIS_URL", "REDIS_URL", "REDIS_HOST", "REDIS_DATABASE"];

    #[test]
    fn test_redis_config_from_env_prefers_queue_url() {
        temp_env::with_vars(
            [
                (KEYS[0], Some("redis://queue:6379")),
                (KEYS[1], Some("redis://shared:6379")),
                (KEYS[2], None),
                (KEYS[3], None),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.url, "redis://queue:6379");
                assert_eq!(config.database, None);
            },
        );
    }

    #[test]
    fn test_redis_config_from_env_falls_back_to_host() {
        temp_env::with_vars(
            [
                (KEYS[0], None),
                (KEYS[1], None),
                (KEYS[2], Some("redis://prod:6379")),
                (KEYS[3], Some("3")),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.url, "redis://prod:6379");
                assert_eq!(config.database, Some(3));
            },
        );
    }

    #[test]
    fn test_redis_config_from_env_missing() {
        temp_env::with_vars(KEYS.map(|key| (key, None::<&str>)), || {
            let err = RedisConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("REDIS_URL"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_redis_config_bad_database() {
        temp_env::with_vars(
            [
                (KEYS[0], Some("redis://queue:6379")),
                (KEYS[1], None),
                (KEYS[2], None),
                (KEYS[3], Some("sixteen")),
            ],
            || {
                let err = RedisConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("REDIS_DATABASE"));
            },
        );
    }

    #[test]
    fn test_build_url() {
        assert_eq!(
            RedisConfig::new("redis://localhost:6379").build_url(),
            "redis://localhost:6379"
        );
        assert_eq!(
            RedisConfig::new("redis://localhost:6379").with_database(2).build_url(),
            "redis://localhost:6379/2"
        );
        assert_eq!(
            RedisConfig::new("redis://:secret@localhost:6379/15?protocol=resp3")
                .with_database(1)
                .build_url(),
            "redis://:secret@localhost:6379/1?protocol=resp3"
        );
    }

    #[test]
    fn test_redis_config_default() {
        assert_eq!(RedisConfig::default().url, "redis://127.0.0.1:6379/15");
    }
}
