//! Retention cleaning of aged indices.
//!
//! ## Architecture
//!
//! - `config`: Cleaner settings derived from the loaded configuration
//! - `policy`: Pure keep/delete decisions for one classified index
//! - `cleaner`: Listing, protection of write targets and bounded concurrent deletion
//!
//! ## Safety Guarantees
//!
//! - Write alias targets are resolved before any decision and never deleted
//! - Names that do not classify are never touched
//! - Dry-run mode logs candidates without deleting

pub mod cleaner;
pub mod config;
pub mod policy;

pub use cleaner::{CleanReport, DeleteOutcome, RetentionCleaner};
pub use config::{CleanerConfigError, CleanerSettings};
pub use policy::{KeepReason, ProtectedSet, RetentionPolicy, Verdict};
