//! Injectable wall clock.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of "now" for age computations.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The system clock.
pub fn system() -> Clock {
    Arc::new(Utc::now)
}

/// A clock frozen at `at`.
pub fn fixed(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}
