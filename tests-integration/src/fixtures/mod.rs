//! Test fixtures for integration testing
//!
//! This module provides an in-memory index store driven by a controllable clock,
//! plus helpers to build the rollover engine and retention cleaner against it.

mod lifecycle_context;

pub use lifecycle_context::{LifecycleTestContext, ManualClock, STORE_TIMEOUT};
