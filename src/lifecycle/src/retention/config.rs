use thiserror::Error;

use common::config::Configuration;

/// Settings for one cleaning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanerSettings {
    /// Indices older than this many days are eligible.
    pub window_days: u32,
    /// Include rollover indices of the main families.
    pub include_rollover: bool,
    /// Include the span-archive family.
    pub include_archive: bool,
    /// Log candidates without deleting them.
    pub dry_run: bool,
    /// Upper bound on deletions in flight.
    pub max_concurrent_deletes: usize,
}

#[derive(Debug, Error)]
pub enum CleanerConfigError {
    #[error("max_concurrent_deletes must be at least 1")]
    NoDeleteWorkers,
}

impl Default for CleanerSettings {
    fn default() -> Self {
        Self {
            window_days: 0,
            include_rollover: false,
            include_archive: false,
            dry_run: false,
            max_concurrent_deletes: 4,
        }
    }
}

impl CleanerSettings {
    /// Settings for a run with the given window, everything else from `config`.
    pub fn from_config(config: &Configuration, window_days: u32) -> Self {
        Self {
            window_days,
            include_rollover: config.cleaner.include_rollover,
            include_archive: config.archive,
            dry_run: config.cleaner.dry_run,
            max_concurrent_deletes: config.cleaner.max_concurrent_deletes,
        }
    }

    pub fn validate(&self) -> Result<(), CleanerConfigError> {
        if self.max_concurrent_deletes == 0 {
            return Err(CleanerConfigError::NoDeleteWorkers);
        }
        Ok(())
    }
}
