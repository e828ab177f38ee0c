//! Index lifecycle engines: rollover of write aliases and retention cleaning.

pub mod deadline;
pub mod retention;
pub mod rollover;

pub use deadline::Deadline;
pub use retention::{CleanReport, CleanerSettings, DeleteOutcome, RetentionCleaner};
pub use rollover::{
    InitOutcome, LookbackOutcome, RolloverConditions, RolloverEngine, RolloverError,
    RolloverOutcome,
};
