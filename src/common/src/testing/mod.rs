//! Test utilities for the index lifecycle crates.
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let config = TestConfigBuilder::new()
//!     .with_prefix("acme")
//!     .with_rollover_cleaning()
//!     .build();
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;
