//! Rollover of per-family write aliases.
//!
//! Each family moves through `Uninitialized -> Active(target)`. `init` creates the
//! first index and attaches the write and read aliases; `rollover` creates the
//! successor and repoints the write alias in one atomic alias update; `lookback`
//! narrows the read alias to recent indices without deleting anything.

mod conditions;
mod engine;

pub use conditions::{ConditionsError, RolloverConditions};
pub use engine::{InitOutcome, LookbackOutcome, RolloverEngine, RolloverError, RolloverOutcome};
