//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::Configuration;
use crate::naming::IndexPrefix;

/// Builder for creating test configurations.
///
/// Starts from [`Configuration::default`] with a short store timeout so a hung
/// fake store fails a test quickly instead of stalling it.
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.store.timeout = Duration::from_secs(5);
        Self { config }
    }

    /// Scope every operation to `prefix`.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.config.index_prefix = IndexPrefix::new(prefix);
        self
    }

    /// Operate on the span-archive family.
    pub fn archive(mut self) -> Self {
        self.config.archive = true;
        self
    }

    /// Let the cleaner delete rollover indices of the main families.
    pub fn with_rollover_cleaning(mut self) -> Self {
        self.config.cleaner.include_rollover = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.config.cleaner.dry_run = true;
        self
    }

    pub fn with_store_url(mut self, url: &str) -> Self {
        self.config.store.url = url.to_string();
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store.timeout = timeout;
        self
    }

    pub fn with_conditions(mut self, conditions: &str) -> Self {
        self.config.rollover.conditions = conditions.to_string();
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.config.rollover.lookback = lookback;
        self
    }

    pub fn with_max_concurrent_deletes(mut self, workers: usize) -> Self {
        self.config.cleaner.max_concurrent_deletes = workers;
        self
    }

    pub fn with_date_separator(mut self, separator: &str) -> Self {
        self.config.date_separator = separator.to_string();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}
