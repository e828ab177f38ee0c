pub mod cli;
pub mod clock;
pub mod config;
pub mod naming;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Configuration;
pub use naming::{Classifier, Family, IndexClass, IndexKind, IndexPrefix};
pub use store::{IndexMeta, IndexStore, StoreError, StoreResult};
