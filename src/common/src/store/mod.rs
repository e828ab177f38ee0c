//! Index store capability: list, create and delete indices and manage aliases.
//!
//! The lifecycle engines only ever talk to the cluster through [`IndexStore`].
//! Two implementations exist:
//!
//! - [`InMemoryIndexStore`]: local state with fault injection, used by tests
//! - [`elasticsearch::connect`]: HTTP admin API, negotiating one protocol
//!   implementation per server generation at connection time

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::naming::IndexPrefix;

pub mod elasticsearch;
pub mod memory;

pub use memory::{InMemoryIndexStore, StoreOp};

/// An index as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    /// Creation timestamp recorded by the store.
    pub created_at: DateTime<Utc>,
    /// Aliases currently attached to the index.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
}

/// Errors returned by index store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transport failure or no supported protocol. Fatal for the run.
    #[error("Index store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Index {0} already exists")]
    AlreadyExists(String),

    #[error("Index {0} not found")]
    NotFound(String),

    /// An atomic alias update found the alias somewhere else.
    #[error("Alias {alias} is not attached to {expected}")]
    Conflict { alias: String, expected: String },

    #[error("Alias {alias} resolves to more than one index: {targets:?}")]
    AmbiguousAlias { alias: String, targets: Vec<String> },

    #[error("{operation} on {target} exceeded deadline of {timeout:?}")]
    DeadlineExceeded {
        operation: &'static str,
        target: String,
        timeout: Duration,
    },

    /// Any other error response, surfaced verbatim.
    #[error("{operation} on {target} failed ({status}): {message}")]
    Api {
        operation: &'static str,
        target: String,
        status: u16,
        message: String,
    },

    #[error("Unexpected response for {operation}: {source}")]
    Deserialize {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Whether the store itself can no longer be trusted for this run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::StoreUnavailable(_) | StoreError::DeadlineExceeded { .. }
        )
    }
}

/// Result type for index store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Administrative operations on indices and aliases.
#[async_trait]
pub trait IndexStore: std::fmt::Debug + Send + Sync + 'static {
    /// List every index whose name lies inside `prefix`.
    async fn list_indices(&self, prefix: &IndexPrefix) -> StoreResult<Vec<IndexMeta>>;

    /// Describe a single index.
    async fn index_meta(&self, name: &str) -> StoreResult<IndexMeta>;

    async fn create_index(&self, name: &str) -> StoreResult<()>;

    async fn delete_index(&self, name: &str) -> StoreResult<()>;

    /// Attach `alias` to `target`, keeping any other targets it already has.
    async fn create_alias(&self, alias: &str, target: &str) -> StoreResult<()>;

    /// Move `alias` from `old_target` to `new_target` in one atomic update.
    async fn repoint_alias(
        &self,
        alias: &str,
        old_target: &str,
        new_target: &str,
    ) -> StoreResult<()>;

    /// Every index `alias` currently points at; empty when the alias does not exist.
    async fn alias_targets(&self, alias: &str) -> StoreResult<Vec<String>>;

    /// Detach `alias` from each of `targets`.
    async fn remove_alias(&self, alias: &str, targets: &[String]) -> StoreResult<()>;

    /// Resolve a write alias to its single target; `None` when unresolved.
    async fn resolve_alias(&self, alias: &str) -> StoreResult<Option<String>> {
        let mut targets = self.alias_targets(alias).await?;
        match targets.len() {
            0 => Ok(None),
            1 => Ok(targets.pop()),
            _ => Err(StoreError::AmbiguousAlias {
                alias: alias.to_string(),
                targets,
            }),
        }
    }
}
