use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use super::{IndexMeta, IndexStore, StoreError, StoreResult};
use crate::clock::{self, Clock};
use crate::naming::IndexPrefix;

/// Store operations, used to target injected faults and to inspect the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ListIndices,
    IndexMeta,
    CreateIndex,
    DeleteIndex,
    CreateAlias,
    RepointAlias,
    AliasTargets,
    RemoveAlias,
}

#[derive(Debug, Default)]
struct StoreState {
    indices: BTreeMap<String, DateTime<Utc>>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    faults: HashMap<(StoreOp, String), StoreError>,
    calls: Vec<(StoreOp, String)>,
}

impl StoreState {
    fn meta(&self, name: &str, created_at: DateTime<Utc>) -> IndexMeta {
        let aliases = self
            .aliases
            .iter()
            .filter(|(_, targets)| targets.contains(name))
            .map(|(alias, _)| alias.clone())
            .collect();
        IndexMeta {
            name: name.to_string(),
            created_at,
            aliases,
        }
    }
}

/// In-memory index store.
///
/// Every operation holds one lock for its whole duration, so alias repoints are
/// atomic. Faults injected with [`InMemoryIndexStore::inject_fault`] fire once.
pub struct InMemoryIndexStore {
    state: Mutex<StoreState>,
    clock: Clock,
    latency: Option<Duration>,
}

impl fmt::Debug for InMemoryIndexStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryIndexStore")
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock: clock::system(),
            latency: None,
        }
    }

    /// Stamp created indices with times from `clock`.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Delay every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert an index with an explicit creation time, bypassing the call log.
    pub async fn seed_index(&self, name: impl Into<String>, created_at: DateTime<Utc>) {
        self.state
            .lock()
            .await
            .indices
            .insert(name.into(), created_at);
    }

    /// Make the next `op` against `target` fail with `error`.
    pub async fn inject_fault(&self, op: StoreOp, target: impl Into<String>, error: StoreError) {
        self.state
            .lock()
            .await
            .faults
            .insert((op, target.into()), error);
    }

    /// Names of every index currently stored.
    pub async fn index_names(&self) -> Vec<String> {
        self.state.lock().await.indices.keys().cloned().collect()
    }

    /// Every operation issued so far, with its target.
    pub async fn calls(&self) -> Vec<(StoreOp, String)> {
        self.state.lock().await.calls.clone()
    }

    async fn enter(&self, op: StoreOp, target: &str) -> StoreResult<MutexGuard<'_, StoreState>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        state.calls.push((op, target.to_string()));
        match state.faults.remove(&(op, target.to_string())) {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn list_indices(&self, prefix: &IndexPrefix) -> StoreResult<Vec<IndexMeta>> {
        let state = self.enter(StoreOp::ListIndices, &prefix.pattern()).await?;
        Ok(state
            .indices
            .iter()
            .filter(|(name, _)| prefix.contains(name))
            .map(|(name, created_at)| state.meta(name, *created_at))
            .collect())
    }

    async fn index_meta(&self, name: &str) -> StoreResult<IndexMeta> {
        let state = self.enter(StoreOp::IndexMeta, name).await?;
        let created_at = state
            .indices
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(state.meta(name, created_at))
    }

    async fn create_index(&self, name: &str) -> StoreResult<()> {
        let mut state = self.enter(StoreOp::CreateIndex, name).await?;
        if state.indices.contains_key(name) || state.aliases.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        state.indices.insert(name.to_string(), (self.clock)());
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> StoreResult<()> {
        let mut state = self.enter(StoreOp::DeleteIndex, name).await?;
        if state.indices.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }

        // Deleting an index detaches it from every alias.
        for targets in state.aliases.values_mut() {
            targets.remove(name);
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        Ok(())
    }

    async fn create_alias(&self, alias: &str, target: &str) -> StoreResult<()> {
        let mut state = self.enter(StoreOp::CreateAlias, alias).await?;
        if !state.indices.contains_key(target) {
            return Err(StoreError::NotFound(target.to_string()));
        }
        if state.indices.contains_key(alias) {
            return Err(StoreError::AlreadyExists(alias.to_string()));
        }
        state
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(target.to_string());
        Ok(())
    }

    async fn repoint_alias(
        &self,
        alias: &str,
        old_target: &str,
        new_target: &str,
    ) -> StoreResult<()> {
        let mut state = self.enter(StoreOp::RepointAlias, alias).await?;
        if !state.indices.contains_key(new_target) {
            return Err(StoreError::NotFound(new_target.to_string()));
        }

        let targets = state
            .aliases
            .get_mut(alias)
            .filter(|targets| targets.contains(old_target))
            .ok_or_else(|| StoreError::Conflict {
                alias: alias.to_string(),
                expected: old_target.to_string(),
            })?;
        targets.remove(old_target);
        targets.insert(new_target.to_string());
        Ok(())
    }

    async fn alias_targets(&self, alias: &str) -> StoreResult<Vec<String>> {
        let state = self.enter(StoreOp::AliasTargets, alias).await?;
        Ok(state
            .aliases
            .get(alias)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_alias(&self, alias: &str, targets: &[String]) -> StoreResult<()> {
        let mut state = self.enter(StoreOp::RemoveAlias, alias).await?;
        let emptied = match state.aliases.get_mut(alias) {
            Some(members) => {
                for target in targets {
                    members.remove(target);
                }
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            state.aliases.remove(alias);
        }
        Ok(())
    }
}
