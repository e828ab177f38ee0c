use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::naming::{DEFAULT_DATE_SEPARATOR, IndexPrefix};

/// Default configuration file, looked up in the working directory
pub const CONFIG_FILE: &str = "index-lifecycle.toml";

/// Prefix for nested environment overrides, e.g. `INDEX_LIFECYCLE__STORE__URL`
pub const ENV_PREFIX: &str = "INDEX_LIFECYCLE__";

/// Connection to the index store's admin API
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the cluster, e.g. `http://localhost:9200`
    pub url: String,
    /// Basic auth user
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Deadline applied to every store call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Primary shards for indices created by rollover
    pub shards: u32,
    /// Replicas for indices created by rollover
    pub replicas: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:9200"),
            username: None,
            password: None,
            timeout: Duration::from_secs(120),
            shards: 5,
            replicas: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RolloverConfig {
    /// Rollover conditions in the cluster's rollover API shape, e.g. `{"max_age":"1d"}`
    pub conditions: String,
    /// Rollover indices older than this are detached from the read alias by `lookback`
    #[serde(with = "humantime_serde")]
    pub lookback: Duration,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            conditions: String::from(r#"{"max_age":"1d"}"#),
            lookback: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanerConfig {
    /// Also delete rollover-named indices of the main families
    pub include_rollover: bool,
    /// Log deletion candidates without deleting them
    pub dry_run: bool,
    /// Upper bound on deletions in flight
    pub max_concurrent_deletes: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            include_rollover: false,
            dry_run: false,
            max_concurrent_deletes: 4,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    /// Tenant prefix applied as `<prefix>-`; empty means unscoped
    pub index_prefix: IndexPrefix,
    /// Operate on the span-archive family instead of the main families
    pub archive: bool,
    /// Separator between year, month and day in daily index names
    pub date_separator: String,
    pub store: StoreConfig,
    pub rollover: RolloverConfig,
    pub cleaner: CleanerConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            index_prefix: IndexPrefix::none(),
            archive: false,
            date_separator: DEFAULT_DATE_SEPARATOR.to_string(),
            store: StoreConfig::default(),
            rollover: RolloverConfig::default(),
            cleaner: CleanerConfig::default(),
        }
    }
}

/// Reasons a loaded configuration cannot be used
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid store URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl Configuration {
    fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from_path(Path::new(CONFIG_FILE))
    }

    /// Load with `path` as the configuration file instead of the default one
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment(path).extract().map_err(Box::new)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.store.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.store.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.store.url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        if self.store.password.is_some() && self.store.username.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "store.password",
                reason: "password given without username".to_string(),
            });
        }
        if self.store.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "store.timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.store.shards == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store.shards",
                reason: "an index needs at least one shard".to_string(),
            });
        }
        if self.cleaner.max_concurrent_deletes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cleaner.max_concurrent_deletes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.date_separator.chars().any(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidValue {
                field: "date_separator",
                reason: format!("'{}' must not contain digits", self.date_separator),
            });
        }
        if self.rollover.conditions.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "rollover.conditions",
                reason: "use '{}' to roll over unconditionally".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();

        assert!(config.index_prefix.is_empty());
        assert!(!config.archive);
        assert_eq!(config.date_separator, "-");
        assert_eq!(config.store.url, "http://localhost:9200");
        assert_eq!(config.store.timeout, Duration::from_secs(120));
        assert_eq!(config.rollover.conditions, r#"{"max_age":"1d"}"#);
        assert!(!config.cleaner.include_rollover);
        assert!(!config.cleaner.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.store.shards, 5);
            assert_eq!(config.store.replicas, 1);
            assert_eq!(config.cleaner.max_concurrent_deletes, 4);
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                index_prefix = "acme"
                archive = true

                [store]
                url = "http://es.internal:9200"
                timeout = "30s"

                [rollover]
                lookback = "7d"
                "#,
            )?;
            jail.set_env("INDEX_LIFECYCLE__STORE__URL", "https://es.prod:9243");
            jail.set_env("INDEX_LIFECYCLE__CLEANER__INCLUDE_ROLLOVER", "true");

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.index_prefix.as_str(), "acme");
            assert!(config.archive);
            assert_eq!(config.store.url, "https://es.prod:9243");
            assert_eq!(config.store.timeout, Duration::from_secs(30));
            assert_eq!(config.rollover.lookback, Duration::from_secs(7 * 24 * 60 * 60));
            assert!(config.cleaner.include_rollover);
            Ok(())
        });
    }

    #[test]
    fn test_load_from_explicit_path() {
        Jail::expect_with(|jail| {
            jail.create_file("lifecycle-test.toml", "date_separator = \".\"")?;

            let config = Configuration::load_from_path(Path::new("lifecycle-test.toml")).map_err(|e| *e)?;
            assert_eq!(config.date_separator, ".");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_duration_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.set_env("INDEX_LIFECYCLE__STORE__TIMEOUT", "soon");
            assert!(Configuration::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Configuration::default();
        config.store.url = "localhost:9200".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));

        let mut config = Configuration::default();
        config.store.url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));

        let mut config = Configuration::default();
        config.cleaner.max_concurrent_deletes = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "cleaner.max_concurrent_deletes",
                ..
            })
        ));

        let mut config = Configuration::default();
        config.store.password = Some("secret".to_string());
        assert!(config.validate().is_err());

        let mut config = Configuration::default();
        config.date_separator = "1".to_string();
        assert!(config.validate().is_err());
    }
}
