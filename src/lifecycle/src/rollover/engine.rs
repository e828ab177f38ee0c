use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use common::clock::{self, Clock};
use common::naming::{Classifier, DEFAULT_DATE_SEPARATOR, Family, IndexKind, IndexPrefix};
use common::store::{IndexStore, StoreError};

use super::conditions::RolloverConditions;
use crate::deadline::Deadline;

#[derive(Debug, thiserror::Error)]
pub enum RolloverError {
    #[error("Write alias {alias} for {family} is not set up; run init first")]
    Uninitialized { family: Family, alias: String },

    #[error("Write alias {alias} points at {target}, which has no successor in the {family} chain")]
    UnexpectedTarget {
        family: Family,
        alias: String,
        target: String,
    },

    #[error("Failed to {step} for {family}")]
    Store {
        family: Family,
        step: &'static str,
        #[source]
        source: StoreError,
    },
}

impl RolloverError {
    fn store(family: Family, step: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| RolloverError::Store {
            family,
            step,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// The write alias already resolved; nothing was changed.
    AlreadyInitialized { target: String },
    /// The first index now sits behind the write and read aliases.
    /// `adopted` is set when the index was left over from an interrupted init.
    Created { index: String, adopted: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloverOutcome {
    /// Conditions did not hold; the write alias still points at `target`.
    NotMet { target: String },
    RolledOver { previous: String, current: String },
}

/// Result of narrowing a family's read alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookbackOutcome {
    pub detached: Vec<String>,
    pub retained: Vec<String>,
}

/// Drives init, rollover and lookback for the families of one prefix.
pub struct RolloverEngine {
    store: Arc<dyn IndexStore>,
    classifier: Classifier,
    deadline: Deadline,
    clock: Clock,
}

impl RolloverEngine {
    pub fn new(store: Arc<dyn IndexStore>, prefix: IndexPrefix, store_timeout: Duration) -> Self {
        Self {
            store,
            classifier: Classifier::new(prefix, DEFAULT_DATE_SEPARATOR),
            deadline: Deadline::new(store_timeout),
            clock: clock::system(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn prefix(&self) -> &IndexPrefix {
        self.classifier.prefix()
    }

    async fn resolve_write_target(&self, family: Family) -> Result<Option<String>, RolloverError> {
        let alias = family.write_alias(self.prefix());
        self.deadline
            .run("resolve_alias", &alias, self.store.resolve_alias(&alias))
            .await
            .map_err(RolloverError::store(family, "resolve the write alias"))
    }

    async fn created_at(&self, family: Family, index: &str) -> Result<DateTime<Utc>, RolloverError> {
        let meta = self
            .deadline
            .run("index_meta", index, self.store.index_meta(index))
            .await
            .map_err(RolloverError::store(family, "read index metadata"))?;
        Ok(meta.created_at)
    }

    /// Create `index`, treating an existing one as left over from an interrupted run.
    async fn create_or_adopt(&self, family: Family, index: &str) -> Result<bool, RolloverError> {
        match self
            .deadline
            .run("create_index", index, self.store.create_index(index))
            .await
        {
            Ok(()) => Ok(false),
            Err(StoreError::AlreadyExists(_)) => {
                warn!(family = %family, index = %index, "Adopting existing index");
                Ok(true)
            }
            Err(e) => Err(RolloverError::store(family, "create index")(e)),
        }
    }

    async fn attach_read_alias(&self, family: Family, index: &str) -> Result<(), RolloverError> {
        let read_alias = family.read_alias(self.prefix());
        self.deadline
            .run(
                "create_alias",
                &read_alias,
                self.store.create_alias(&read_alias, index),
            )
            .await
            .map_err(RolloverError::store(family, "attach the read alias"))
    }

    /// Add the write target to the read alias unless it is already a member.
    ///
    /// Completes a previous run that moved the write alias but failed before the
    /// read alias was updated.
    async fn ensure_readable(&self, family: Family, target: &str) -> Result<(), RolloverError> {
        let read_alias = family.read_alias(self.prefix());
        let members = self
            .deadline
            .run(
                "alias_targets",
                &read_alias,
                self.store.alias_targets(&read_alias),
            )
            .await
            .map_err(RolloverError::store(family, "list read alias members"))?;
        if members.iter().any(|member| member == target) {
            return Ok(());
        }

        warn!(
            family = %family,
            read_alias = %read_alias,
            target = %target,
            "Write target missing from read alias, attaching"
        );
        self.attach_read_alias(family, target).await
    }

    /// Bootstrap `family`: first index, write alias and read alias.
    ///
    /// Safe to repeat; once the write alias resolves only a missing read alias
    /// membership is repaired.
    pub async fn init(&self, family: Family) -> Result<InitOutcome, RolloverError> {
        if let Some(target) = self.resolve_write_target(family).await? {
            self.ensure_readable(family, &target).await?;
            info!(family = %family, target = %target, "Write alias already initialized");
            return Ok(InitOutcome::AlreadyInitialized { target });
        }

        let index = family.rollover_index(self.prefix(), 1);
        let adopted = self.create_or_adopt(family, &index).await?;

        let write_alias = family.write_alias(self.prefix());
        self.deadline
            .run(
                "create_alias",
                &write_alias,
                self.store.create_alias(&write_alias, &index),
            )
            .await
            .map_err(RolloverError::store(family, "create the write alias"))?;
        self.attach_read_alias(family, &index).await?;

        info!(
            family = %family,
            index = %index,
            write_alias = %write_alias,
            adopted,
            "Initialized rollover chain"
        );
        Ok(InitOutcome::Created { index, adopted })
    }

    /// Initialize every family of the given mode.
    pub async fn init_all(&self, archive: bool) -> Result<Vec<(Family, InitOutcome)>, RolloverError> {
        let mut outcomes = Vec::new();
        for &family in Family::for_mode(archive) {
            outcomes.push((family, self.init(family).await?));
        }
        Ok(outcomes)
    }

    /// Move the write alias of `family` to a new index when `conditions` hold.
    ///
    /// The successor is created before the alias moves, and the alias moves in a
    /// single update, so writers always see exactly one target. The current target
    /// is re-attached to the read alias first if an earlier run left it out.
    pub async fn rollover(
        &self,
        family: Family,
        conditions: &RolloverConditions,
    ) -> Result<RolloverOutcome, RolloverError> {
        let write_alias = family.write_alias(self.prefix());
        let current = self
            .resolve_write_target(family)
            .await?
            .ok_or_else(|| RolloverError::Uninitialized {
                family,
                alias: write_alias.clone(),
            })?;
        self.ensure_readable(family, &current).await?;

        let created_at = self.created_at(family, &current).await?;
        let now = (self.clock)();
        if !conditions.is_met(created_at, now) {
            debug!(family = %family, target = %current, created_at = %created_at, "Rollover conditions not met");
            return Ok(RolloverOutcome::NotMet { target: current });
        }

        let successor = self
            .classifier
            .classify(&current)
            .filter(|class| class.family == family)
            .and_then(|class| class.successor(self.prefix()))
            .ok_or_else(|| RolloverError::UnexpectedTarget {
                family,
                alias: write_alias.clone(),
                target: current.clone(),
            })?;

        self.create_or_adopt(family, &successor).await?;
        self.deadline
            .run(
                "repoint_alias",
                &write_alias,
                self.store.repoint_alias(&write_alias, &current, &successor),
            )
            .await
            .map_err(RolloverError::store(family, "repoint the write alias"))?;
        self.attach_read_alias(family, &successor).await?;

        info!(
            family = %family,
            previous = %current,
            current = %successor,
            "Rolled over write alias"
        );
        Ok(RolloverOutcome::RolledOver {
            previous: current,
            current: successor,
        })
    }

    /// Roll over every family of the given mode.
    pub async fn rollover_all(
        &self,
        archive: bool,
        conditions: &RolloverConditions,
    ) -> Result<Vec<(Family, RolloverOutcome)>, RolloverError> {
        let mut outcomes = Vec::new();
        for &family in Family::for_mode(archive) {
            outcomes.push((family, self.rollover(family, conditions).await?));
        }
        Ok(outcomes)
    }

    /// Detach rollover indices older than `max_age` from the read alias of `family`.
    ///
    /// The write target always stays readable. Nothing is deleted.
    pub async fn lookback(
        &self,
        family: Family,
        max_age: Duration,
    ) -> Result<LookbackOutcome, RolloverError> {
        let write_target = self
            .resolve_write_target(family)
            .await?
            .ok_or_else(|| RolloverError::Uninitialized {
                family,
                alias: family.write_alias(self.prefix()),
            })?;

        let read_alias = family.read_alias(self.prefix());
        let members = self
            .deadline
            .run(
                "alias_targets",
                &read_alias,
                self.store.alias_targets(&read_alias),
            )
            .await
            .map_err(RolloverError::store(family, "list read alias members"))?;

        let now = (self.clock)();
        let mut outcome = LookbackOutcome::default();
        for member in members {
            let is_chain_member = self.classifier.classify(&member).is_some_and(|class| {
                class.family == family && matches!(class.kind, IndexKind::Rollover { .. })
            });
            if !is_chain_member || member == write_target {
                outcome.retained.push(member);
                continue;
            }

            let created_at = self.created_at(family, &member).await?;
            let expired = (now - created_at).to_std().is_ok_and(|age| age > max_age);
            if expired {
                outcome.detached.push(member);
            } else {
                outcome.retained.push(member);
            }
        }

        if !outcome.detached.is_empty() {
            self.deadline
                .run(
                    "remove_alias",
                    &read_alias,
                    self.store.remove_alias(&read_alias, &outcome.detached),
                )
                .await
                .map_err(RolloverError::store(family, "narrow the read alias"))?;
        }

        info!(
            family = %family,
            read_alias = %read_alias,
            detached = outcome.detached.len(),
            retained = outcome.retained.len(),
            "Applied lookback to read alias"
        );
        Ok(outcome)
    }

    /// Apply lookback to every family of the given mode.
    pub async fn lookback_all(
        &self,
        archive: bool,
        max_age: Duration,
    ) -> Result<Vec<(Family, LookbackOutcome)>, RolloverError> {
        let mut outcomes = Vec::new();
        for &family in Family::for_mode(archive) {
            outcomes.push((family, self.lookback(family, max_age).await?));
        }
        Ok(outcomes)
    }
}
