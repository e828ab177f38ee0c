use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Conditions under which the write alias moves to a new index.
///
/// Parsed from the rollover API's JSON shape, e.g. `{"max_age":"1d"}`.
/// An empty object or a zero `max_age` rolls over unconditionally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolloverConditions {
    #[serde(default, with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid rollover conditions '{input}': {source}")]
pub struct ConditionsError {
    input: String,
    #[source]
    source: serde_json::Error,
}

impl RolloverConditions {
    /// Roll over on every run.
    pub fn always() -> Self {
        Self::default()
    }

    pub fn max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
        }
    }

    pub fn parse(input: &str) -> Result<Self, ConditionsError> {
        serde_json::from_str(input.trim()).map_err(|source| ConditionsError {
            input: input.to_string(),
            source,
        })
    }

    /// Whether an index created at `created_at` should be rolled over at `now`.
    pub fn is_met(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.max_age {
            None => true,
            Some(max_age) if max_age.is_zero() => true,
            Some(max_age) => (now - created_at)
                .to_std()
                .is_ok_and(|age| age >= max_age),
        }
    }
}
