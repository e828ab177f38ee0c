//! Index deletion with bounded concurrency.
//!
//! A run lists the prefix scope once, captures the protected set of write alias
//! targets, evaluates every index against [`RetentionPolicy`] and then deletes
//! the candidates with at most `max_concurrent_deletes` calls in flight.
//! Individual failures are collected and the remaining deletions continue. A
//! fatal store error (unreachable store, deadline exceeded) or a shutdown signal
//! stops new deletions from being issued.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use common::clock::{self, Clock};
use common::naming::{Classifier, Family};
use common::store::{IndexMeta, IndexStore, StoreError};

use super::config::CleanerSettings;
use super::policy::{ProtectedSet, RetentionPolicy, Verdict};
use crate::deadline::Deadline;

/// What happened to one deletion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The index vanished between listing and deletion.
    AlreadyGone,
    /// Not attempted: shutdown was requested or the store failed fatally.
    Skipped,
    Failed(String),
}

/// Summary of a cleaning run.
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    /// Indices listed under the prefix.
    pub evaluated: usize,
    /// Indices eligible for deletion.
    pub candidates: Vec<String>,
    pub deleted: Vec<String>,
    pub already_gone: Vec<String>,
    pub skipped: Vec<String>,
    /// Indices that failed to delete with error messages.
    pub failed: Vec<(String, String)>,
    pub dry_run: bool,
}

impl CleanReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len() + self.already_gone.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Whether deletions were left unattempted.
    pub fn was_interrupted(&self) -> bool {
        !self.skipped.is_empty()
    }

    fn record(&mut self, index: String, outcome: DeleteOutcome) {
        match outcome {
            DeleteOutcome::Deleted => self.deleted.push(index),
            DeleteOutcome::AlreadyGone => self.already_gone.push(index),
            DeleteOutcome::Skipped => self.skipped.push(index),
            DeleteOutcome::Failed(reason) => self.failed.push((index, reason)),
        }
    }

    fn sort(&mut self) {
        self.deleted.sort();
        self.already_gone.sort();
        self.skipped.sort();
        self.failed.sort();
    }
}

/// Deletes aged indices within one prefix scope.
pub struct RetentionCleaner {
    store: Arc<dyn IndexStore>,
    classifier: Classifier,
    settings: CleanerSettings,
    deadline: Deadline,
    clock: Clock,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RetentionCleaner {
    pub fn new(
        store: Arc<dyn IndexStore>,
        classifier: Classifier,
        settings: CleanerSettings,
        store_timeout: Duration,
    ) -> Result<Self> {
        settings
            .validate()
            .context("Invalid cleaner settings")?;

        Ok(Self {
            store,
            classifier,
            settings,
            deadline: Deadline::new(store_timeout),
            clock: clock::system(),
            shutdown: None,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Stop issuing deletions once `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run one cleaning pass.
    ///
    /// # Errors
    ///
    /// Returns an error when the scope cannot be listed or a write alias cannot be
    /// resolved; nothing is deleted in that case. Individual deletion failures are
    /// tracked in the report but do not fail the run.
    pub async fn clean(&self) -> Result<CleanReport> {
        let started_at = Utc::now();
        let prefix = self.classifier.prefix();
        let policy = RetentionPolicy::new(&self.settings, (self.clock)());

        info!(
            prefix = %prefix,
            policy = %policy.display(),
            dry_run = self.settings.dry_run,
            "Starting retention cleaning run"
        );

        let pattern = prefix.pattern();
        let indices = self
            .deadline
            .run("list_indices", &pattern, self.store.list_indices(prefix))
            .await
            .with_context(|| format!("Failed to list indices matching {pattern}"))?;

        let (protected, archive_chain_live) = self.protected_targets(&indices).await?;
        debug!(
            protected = ?protected.iter().collect::<Vec<_>>(),
            archive_chain_live,
            "Captured write alias targets"
        );

        let mut report = CleanReport {
            evaluated: indices.len(),
            dry_run: self.settings.dry_run,
            ..CleanReport::default()
        };

        for meta in &indices {
            let class = self.classifier.classify(&meta.name);
            match policy.evaluate(meta, class, &protected, archive_chain_live) {
                Verdict::Delete => report.candidates.push(meta.name.clone()),
                Verdict::Keep(reason) => {
                    debug!(index = %meta.name, reason = %reason, "Keeping index");
                }
            }
        }

        if report.candidates.is_empty() {
            info!(
                prefix = %prefix,
                evaluated = report.evaluated,
                "No indices eligible for deletion"
            );
            return Ok(report);
        }

        if self.settings.dry_run {
            for index in &report.candidates {
                info!(index = %index, "[DRY-RUN] Would delete index");
            }
            info!(
                candidates = report.candidates.len(),
                "[DRY-RUN] Retention cleaning run completed"
            );
            return Ok(report);
        }

        let halted = AtomicBool::new(false);
        let outcomes: Vec<(String, DeleteOutcome)> = stream::iter(report.candidates.clone())
            .map(|index| {
                let halted = &halted;
                async move {
                    let outcome = self.delete_one(&index, halted).await;
                    (index, outcome)
                }
            })
            .buffer_unordered(self.settings.max_concurrent_deletes)
            .collect()
            .await;

        for (index, outcome) in outcomes {
            report.record(index, outcome);
        }
        report.sort();

        let completed_at = Utc::now();
        info!(
            prefix = %prefix,
            evaluated = report.evaluated,
            deleted = report.deleted.len(),
            already_gone = report.already_gone.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            duration_ms = (completed_at - started_at).num_milliseconds(),
            "Retention cleaning run completed"
        );

        Ok(report)
    }

    /// Resolve every write alias in scope.
    ///
    /// Returns the protected set and whether the archive family's chain is live.
    async fn protected_targets(&self, indices: &[IndexMeta]) -> Result<(ProtectedSet, bool)> {
        let prefix = self.classifier.prefix();
        let mut protected = ProtectedSet::new();
        let mut archive_chain_live = false;

        for family in Family::ALL {
            let alias = family.write_alias(prefix);
            let live = match self
                .deadline
                .run("resolve_alias", &alias, self.store.resolve_alias(&alias))
                .await
            {
                Ok(Some(target)) => {
                    protected.insert(target);
                    true
                }
                Ok(None) => false,
                Err(StoreError::AmbiguousAlias { alias, targets }) => {
                    warn!(
                        alias = %alias,
                        targets = ?targets,
                        "Write alias has several targets, protecting all of them"
                    );
                    for target in targets {
                        protected.insert(target);
                    }
                    true
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to resolve write alias {alias}"));
                }
            };

            // The listing may show the alias even when resolution raced with a rollover.
            let mut listed = false;
            for meta in indices.iter().filter(|meta| meta.aliases.contains(&alias)) {
                protected.insert(meta.name.clone());
                listed = true;
            }

            if family.is_archive() {
                archive_chain_live = live || listed;
            }
        }

        Ok((protected, archive_chain_live))
    }

    async fn delete_one(&self, index: &str, halted: &AtomicBool) -> DeleteOutcome {
        if self.shutdown_requested() || halted.load(Ordering::Acquire) {
            debug!(index = %index, "Skipping deletion");
            return DeleteOutcome::Skipped;
        }

        match self
            .deadline
            .run("delete_index", index, self.store.delete_index(index))
            .await
        {
            Ok(()) => {
                info!(index = %index, "Deleted index");
                DeleteOutcome::Deleted
            }
            Err(StoreError::NotFound(_)) => {
                debug!(index = %index, "Index already gone");
                DeleteOutcome::AlreadyGone
            }
            Err(e) => {
                if e.is_fatal() {
                    halted.store(true, Ordering::Release);
                    error!(index = %index, error = %e, "Index store failed, halting deletions");
                } else {
                    warn!(index = %index, error = %e, "Failed to delete index");
                }
                DeleteOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as TimeDelta, TimeZone};
    use common::naming::IndexPrefix;
    use common::store::{InMemoryIndexStore, StoreOp, StoreResult};
    use std::sync::atomic::AtomicUsize;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn settings(window_days: u32) -> CleanerSettings {
        CleanerSettings {
            window_days,
            include_rollover: true,
            ..CleanerSettings::default()
        }
    }

    fn cleaner(store: Arc<InMemoryIndexStore>, settings: CleanerSettings) -> RetentionCleaner {
        let _ = env_logger::builder().is_test(true).try_init();
        RetentionCleaner::new(
            store,
            Classifier::new(IndexPrefix::none(), "-"),
            settings,
            Duration::from_secs(5),
        )
        .unwrap()
        .with_clock(clock::fixed(now()))
    }

    async fn seeded_store() -> Arc<InMemoryIndexStore> {
        let store = Arc::new(InMemoryIndexStore::new());
        let old = now() - TimeDelta::days(30);
        store.seed_index("jaeger-span-2024-04-01", old).await;
        store.seed_index("jaeger-service-2024-04-01", old).await;
        store.seed_index("jaeger-span-000001", old).await;
        store.seed_index("jaeger-span-000002", old).await;
        store.seed_index("kibana-1", old).await;
        store
            .create_alias("jaeger-span-write", "jaeger-span-000002")
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_clean_deletes_eligible_only() {
        let store = seeded_store().await;
        let report = cleaner(store.clone(), settings(1)).clean().await.unwrap();

        assert_eq!(report.evaluated, 5);
        assert_eq!(
            report.deleted,
            vec![
                "jaeger-service-2024-04-01",
                "jaeger-span-000001",
                "jaeger-span-2024-04-01"
            ]
        );
        assert!(!report.has_failures());
        assert_eq!(
            store.index_names().await,
            vec!["jaeger-span-000002", "kibana-1"]
        );
    }

    #[tokio::test]
    async fn test_empty_store_is_noop() {
        let store = Arc::new(InMemoryIndexStore::new());
        let report = cleaner(store.clone(), settings(0)).clean().await.unwrap();

        assert_eq!(report.evaluated, 0);
        assert_eq!(report.deleted_count(), 0);
        assert!(!report.has_failures());
        assert!(
            !store
                .calls()
                .await
                .iter()
                .any(|(op, _)| *op == StoreOp::DeleteIndex)
        );
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let store = seeded_store().await;
        let report = cleaner(
            store.clone(),
            CleanerSettings {
                dry_run: true,
                ..settings(1)
            },
        )
        .clean()
        .await
        .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.candidates.len(), 3);
        assert!(report.deleted.is_empty());
        assert_eq!(store.index_names().await.len(), 5);
    }

    #[tokio::test]
    async fn test_failures_are_collected() {
        let store = seeded_store().await;
        store
            .inject_fault(
                StoreOp::DeleteIndex,
                "jaeger-span-000001",
                StoreError::Api {
                    operation: "delete_index",
                    target: "jaeger-span-000001".into(),
                    status: 403,
                    message: "cluster_block_exception".into(),
                },
            )
            .await;
        store
            .inject_fault(
                StoreOp::DeleteIndex,
                "jaeger-service-2024-04-01",
                StoreError::NotFound("jaeger-service-2024-04-01".into()),
            )
            .await;

        let report = cleaner(store.clone(), settings(1)).clean().await.unwrap();

        assert!(report.has_failures());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "jaeger-span-000001");
        assert!(report.failed[0].1.contains("403"));
        assert_eq!(report.already_gone, vec!["jaeger-service-2024-04-01"]);
        assert_eq!(report.deleted, vec!["jaeger-span-2024-04-01"]);
    }

    #[tokio::test]
    async fn test_fatal_error_halts_remaining_deletes() {
        let store = seeded_store().await;
        store
            .inject_fault(
                StoreOp::DeleteIndex,
                "jaeger-service-2024-04-01",
                StoreError::StoreUnavailable("connection refused".into()),
            )
            .await;

        let report = cleaner(
            store.clone(),
            CleanerSettings {
                max_concurrent_deletes: 1,
                ..settings(1)
            },
        )
        .clean()
        .await
        .unwrap();

        // Candidates are issued in listing order, one at a time.
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.skipped,
            vec!["jaeger-span-000001", "jaeger-span-2024-04-01"]
        );
        assert!(report.was_interrupted());
        assert_eq!(store.index_names().await.len(), 5);
    }

    #[tokio::test]
    async fn test_unresolvable_alias_aborts_before_deleting() {
        let store = seeded_store().await;
        store
            .inject_fault(
                StoreOp::AliasTargets,
                "jaeger-service-write",
                StoreError::StoreUnavailable("connection reset".into()),
            )
            .await;

        let result = cleaner(store.clone(), settings(1)).clean().await;
        assert!(result.is_err());
        assert_eq!(store.index_names().await.len(), 5);
    }

    #[tokio::test]
    async fn test_ambiguous_write_alias_protects_all_targets() {
        let store = seeded_store().await;
        store
            .create_alias("jaeger-span-write", "jaeger-span-000001")
            .await
            .unwrap();

        let report = cleaner(store.clone(), settings(1)).clean().await.unwrap();
        assert!(!report.deleted.contains(&"jaeger-span-000001".to_string()));
        assert!(store
            .index_names()
            .await
            .contains(&"jaeger-span-000001".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_skips_deletes() {
        let store = seeded_store().await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = cleaner(store.clone(), settings(1))
            .with_shutdown(rx)
            .clean()
            .await
            .unwrap();

        assert_eq!(report.skipped.len(), 3);
        assert!(report.deleted.is_empty());
        assert_eq!(store.index_names().await.len(), 5);
    }

    #[tokio::test]
    async fn test_slow_store_exceeds_deadline() {
        let store = Arc::new(InMemoryIndexStore::new().with_latency(Duration::from_millis(200)));
        store
            .seed_index("jaeger-span-2024-04-01", now() - TimeDelta::days(30))
            .await;

        let cleaner = RetentionCleaner::new(
            store,
            Classifier::new(IndexPrefix::none(), "-"),
            settings(1),
            Duration::from_millis(20),
        )
        .unwrap()
        .with_clock(clock::fixed(now()));

        // Listing already exceeds the deadline.
        let err = cleaner.clean().await.unwrap_err();
        assert!(format!("{err:#}").contains("exceeded deadline"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = RetentionCleaner::new(
            Arc::new(InMemoryIndexStore::new()),
            Classifier::new(IndexPrefix::none(), "-"),
            CleanerSettings {
                max_concurrent_deletes: 0,
                ..CleanerSettings::default()
            },
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    /// Delegates to an in-memory store and records how many deletes overlap.
    #[derive(Debug, Default)]
    struct ConcurrencyTrackingStore {
        inner: InMemoryIndexStore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl IndexStore for ConcurrencyTrackingStore {
        async fn list_indices(&self, prefix: &IndexPrefix) -> StoreResult<Vec<IndexMeta>> {
            self.inner.list_indices(prefix).await
        }

        async fn index_meta(&self, name: &str) -> StoreResult<IndexMeta> {
            self.inner.index_meta(name).await
        }

        async fn create_index(&self, name: &str) -> StoreResult<()> {
            self.inner.create_index(name).await
        }

        async fn delete_index(&self, name: &str) -> StoreResult<()> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.delete_index(name).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn create_alias(&self, alias: &str, target: &str) -> StoreResult<()> {
            self.inner.create_alias(alias, target).await
        }

        async fn repoint_alias(
            &self,
            alias: &str,
            old_target: &str,
            new_target: &str,
        ) -> StoreResult<()> {
            self.inner.repoint_alias(alias, old_target, new_target).await
        }

        async fn alias_targets(&self, alias: &str) -> StoreResult<Vec<String>> {
            self.inner.alias_targets(alias).await
        }

        async fn remove_alias(&self, alias: &str, targets: &[String]) -> StoreResult<()> {
            self.inner.remove_alias(alias, targets).await
        }
    }

    #[tokio::test]
    async fn test_deletes_bounded_by_worker_count() {
        for workers in [1, 2, 4] {
            let store = Arc::new(ConcurrencyTrackingStore::default());
            for day in 1..=8 {
                store
                    .inner
                    .seed_index(format!("jaeger-span-2024-04-{day:02}"), now() - TimeDelta::days(30))
                    .await;
            }

            let cleaner = RetentionCleaner::new(
                store.clone(),
                Classifier::new(IndexPrefix::none(), "-"),
                CleanerSettings {
                    window_days: 1,
                    max_concurrent_deletes: workers,
                    ..CleanerSettings::default()
                },
                Duration::from_secs(5),
            )
            .unwrap()
            .with_clock(clock::fixed(now()));

            let report = cleaner.clean().await.unwrap();
            assert_eq!(report.deleted.len(), 8);
            assert_eq!(store.peak.load(Ordering::SeqCst), workers, "workers {workers}");
            assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
        }
    }
}
