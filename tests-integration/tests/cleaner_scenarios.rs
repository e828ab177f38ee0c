//! Integration tests for retention cleaning against a seeded store
//!
//! Every scenario starts from the same set of indices (see
//! [`LifecycleTestContext::seed_scenario`]) and runs once unscoped and once under
//! a tenant prefix. The prefixed run shares its store with a fully seeded
//! unscoped tenant that must come out untouched.

use anyhow::Result;
use chrono::{Duration as TimeDelta, NaiveDate};
use common::naming::Family;
use common::store::{IndexStore, StoreError, StoreOp};
use lifecycle::{CleanerSettings, RolloverConditions};
use tests_integration::fixtures::LifecycleTestContext;
use tests_integration::init_test_logging;
use tokio::sync::watch;

const PREFIXES: [&str; 2] = ["", "tenant1"];

async fn seeded(prefix: &str) -> Result<LifecycleTestContext> {
    let ctx = LifecycleTestContext::new(prefix);
    ctx.seed_scenario().await?;
    Ok(ctx)
}

/// Seeds the unscoped tenant's scenario first, then `prefix`'s on the same store.
///
/// Returns the context for `prefix` and the neighbour's index names. The
/// neighbour list is empty when `prefix` is itself unscoped.
async fn seeded_with_neighbour(prefix: &str) -> Result<(LifecycleTestContext, Vec<String>)> {
    if prefix.is_empty() {
        return Ok((seeded(prefix).await?, Vec::new()));
    }

    let neighbour = LifecycleTestContext::unscoped();
    neighbour.seed_scenario().await?;
    let neighbour_names = neighbour.store.index_names().await;

    let ctx = neighbour.sharing(prefix);
    ctx.seed_scenario().await?;
    Ok((ctx, neighbour_names))
}

/// Everything outside `ctx`'s prefix is exactly the neighbour's seeded set
async fn assert_neighbour_untouched(ctx: &LifecycleTestContext, neighbour: &[String]) {
    if neighbour.is_empty() {
        return;
    }
    let outside: Vec<String> = ctx
        .store
        .index_names()
        .await
        .into_iter()
        .filter(|name| !ctx.prefix.contains(name))
        .collect();
    assert_eq!(outside, neighbour, "prefix {} reached its neighbour", ctx.prefix);
}

/// Daily-only mode deletes the legacy span indices and nothing else
#[tokio::test]
async fn test_daily_only_scenario() -> Result<()> {
    init_test_logging();

    for prefix in PREFIXES {
        let (ctx, neighbour) = seeded_with_neighbour(prefix).await?;
        let report = ctx.clean(0, false, false).await?;

        assert_eq!(
            report.deleted,
            ctx.names(&["jaeger-span-2019-01-01", "jaeger-span-2019-01-02"]),
            "prefix {prefix:?}"
        );
        assert!(!report.has_failures());
        assert_eq!(
            ctx.index_names().await,
            ctx.names(&[
                "jaeger-span-000001",
                "jaeger-span-000002",
                "jaeger-span-archive",
                "jaeger-span-archive-000001",
                "jaeger-span-archive-000002",
            ]),
            "prefix {prefix:?}"
        );
        assert_neighbour_untouched(&ctx, &neighbour).await;
    }
    Ok(())
}

/// Rollover mode also deletes the unaliased span predecessor
#[tokio::test]
async fn test_rollover_scenario() -> Result<()> {
    init_test_logging();

    for prefix in PREFIXES {
        let (ctx, neighbour) = seeded_with_neighbour(prefix).await?;
        let report = ctx.clean(0, true, false).await?;

        assert_eq!(
            report.deleted,
            ctx.names(&[
                "jaeger-span-000001",
                "jaeger-span-2019-01-01",
                "jaeger-span-2019-01-02",
            ]),
            "prefix {prefix:?}"
        );
        assert_eq!(
            ctx.index_names().await,
            ctx.names(&[
                "jaeger-span-000002",
                "jaeger-span-archive",
                "jaeger-span-archive-000001",
                "jaeger-span-archive-000002",
            ]),
            "prefix {prefix:?}"
        );
        assert_neighbour_untouched(&ctx, &neighbour).await;
    }
    Ok(())
}

/// Archive mode deletes the unaliased archive predecessor and keeps main rollover indices
#[tokio::test]
async fn test_archive_scenario() -> Result<()> {
    init_test_logging();

    for prefix in PREFIXES {
        let (ctx, neighbour) = seeded_with_neighbour(prefix).await?;
        let report = ctx.clean(0, false, true).await?;

        assert_eq!(
            report.deleted,
            ctx.names(&[
                "jaeger-span-2019-01-01",
                "jaeger-span-2019-01-02",
                "jaeger-span-archive-000001",
            ]),
            "prefix {prefix:?}"
        );
        assert_eq!(
            ctx.index_names().await,
            ctx.names(&[
                "jaeger-span-000001",
                "jaeger-span-000002",
                "jaeger-span-archive",
                "jaeger-span-archive-000002",
            ]),
            "prefix {prefix:?}"
        );
        assert_neighbour_untouched(&ctx, &neighbour).await;
    }
    Ok(())
}

/// A second run over the same state succeeds without deleting anything
#[tokio::test]
async fn test_repeated_run_is_noop() -> Result<()> {
    init_test_logging();

    let ctx = seeded("").await?;
    let first = ctx.clean(0, true, true).await?;
    assert_eq!(first.deleted.len(), 4);

    let second = ctx.clean(0, true, true).await?;
    assert!(second.candidates.is_empty());
    assert_eq!(second.deleted_count(), 0);
    assert!(!second.has_failures());
    Ok(())
}

/// A store without any index is cleaned successfully with zero deletions
#[tokio::test]
async fn test_empty_store() -> Result<()> {
    init_test_logging();

    for prefix in PREFIXES {
        let ctx = LifecycleTestContext::new(prefix);
        let report = ctx.clean(0, true, true).await?;

        assert_eq!(report.evaluated, 0);
        assert_eq!(report.deleted_count(), 0);
        assert!(!report.has_failures());
        assert!(!report.was_interrupted());
    }
    Ok(())
}

/// Smaller windows delete a superset of what larger windows delete
#[tokio::test]
async fn test_age_monotonicity() -> Result<()> {
    init_test_logging();

    let mut previous: Option<Vec<String>> = None;
    for window in 0..12 {
        let ctx = LifecycleTestContext::unscoped();
        let today = ctx.now().date_naive();
        for days_ago in 0..10 {
            for family in Family::MAIN {
                ctx.seed_daily(family, today - TimeDelta::days(days_ago))
                    .await;
            }
        }

        let report = ctx.clean(window, true, false).await?;
        let expected = 3 * 10usize.saturating_sub(window as usize + 1);
        assert_eq!(report.deleted.len(), expected, "window {window}");

        if let Some(previous) = &previous {
            assert!(
                report.deleted.iter().all(|index| previous.contains(index)),
                "window {window} deleted an index that window {} kept",
                window - 1
            );
        }
        previous = Some(report.deleted);
    }
    Ok(())
}

/// The write target captured before a rollover is never deleted by a subsequent run
#[tokio::test]
async fn test_write_target_protected_after_rollover() -> Result<()> {
    init_test_logging();

    let ctx = LifecycleTestContext::new("acme");
    let engine = ctx.engine();
    engine.init_all(false).await?;

    // Old enough for any window, yet still the write target.
    ctx.clock.advance(TimeDelta::days(30));
    let before = ctx
        .store
        .resolve_alias(&Family::Span.write_alias(&ctx.prefix))
        .await?
        .expect("write alias resolves");

    let report = ctx.clean(0, true, false).await?;
    assert!(report.deleted.is_empty());
    assert!(ctx.index_names().await.contains(&before));

    engine
        .rollover(Family::Span, &RolloverConditions::always())
        .await?;
    let report = ctx.clean(0, true, false).await?;
    assert_eq!(report.deleted, vec![before]);
    assert!(
        ctx.index_names()
            .await
            .contains(&ctx.name("jaeger-span-000002"))
    );
    Ok(())
}

/// One failing deletion does not stop the others and fails the run as a whole
#[tokio::test]
async fn test_partial_failure_is_reported() -> Result<()> {
    init_test_logging();

    let ctx = seeded("").await?;
    ctx.store
        .inject_fault(
            StoreOp::DeleteIndex,
            "jaeger-span-2019-01-01",
            StoreError::Api {
                operation: "delete_index",
                target: "jaeger-span-2019-01-01".to_string(),
                status: 403,
                message: "index is read-only".to_string(),
            },
        )
        .await;

    let report = ctx.clean(0, true, false).await?;
    assert!(report.has_failures());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "jaeger-span-2019-01-01");
    assert_eq!(
        report.deleted,
        vec!["jaeger-span-000001", "jaeger-span-2019-01-02"]
    );
    assert!(
        ctx.index_names()
            .await
            .contains(&"jaeger-span-2019-01-01".to_string())
    );
    Ok(())
}

/// A store outage halts the remaining deletions instead of hammering the store
#[tokio::test]
async fn test_store_outage_halts_deletions() -> Result<()> {
    init_test_logging();

    let ctx = seeded("").await?;
    ctx.store
        .inject_fault(
            StoreOp::DeleteIndex,
            "jaeger-span-000001",
            StoreError::StoreUnavailable("connection reset by peer".to_string()),
        )
        .await;

    let settings = CleanerSettings {
        window_days: 0,
        include_rollover: true,
        max_concurrent_deletes: 1,
        ..CleanerSettings::default()
    };
    let report = ctx.cleaner(settings)?.clean().await?;

    // Candidates are processed in listing order with a single worker.
    assert_eq!(report.failed.len(), 1);
    assert!(report.deleted.is_empty());
    assert_eq!(
        report.skipped,
        vec!["jaeger-span-2019-01-01", "jaeger-span-2019-01-02"]
    );
    Ok(())
}

/// A shutdown requested before deletion leaves every candidate in place
#[tokio::test]
async fn test_shutdown_stops_deletions() -> Result<()> {
    init_test_logging();

    let ctx = seeded("").await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send(true)?;

    let settings = CleanerSettings {
        window_days: 0,
        ..CleanerSettings::default()
    };
    let report = ctx
        .cleaner(settings)?
        .with_shutdown(shutdown_rx)
        .clean()
        .await?;

    assert!(report.was_interrupted());
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.deleted_count(), 0);
    assert_eq!(ctx.index_names().await.len(), 7);
    Ok(())
}

/// Dry runs report candidates without deleting
#[tokio::test]
async fn test_dry_run_deletes_nothing() -> Result<()> {
    init_test_logging();

    let (ctx, neighbour) = seeded_with_neighbour("tenant1").await?;
    let settings = CleanerSettings {
        window_days: 0,
        include_rollover: true,
        include_archive: true,
        dry_run: true,
        ..CleanerSettings::default()
    };
    let report = ctx.cleaner(settings)?.clean().await?;

    assert!(report.dry_run);
    assert_eq!(report.candidates.len(), 4);
    assert!(report.deleted.is_empty());
    assert_eq!(ctx.index_names().await.len(), 7);
    assert_neighbour_untouched(&ctx, &neighbour).await;
    Ok(())
}

/// Indices that do not match a known name are never deleted
#[tokio::test]
async fn test_unknown_names_are_kept() -> Result<()> {
    init_test_logging();

    let ctx = LifecycleTestContext::unscoped();
    let long_ago = ctx.now() - TimeDelta::days(400);
    ctx.seed("jaeger-span-2019-13-01", long_ago).await;
    ctx.seed("jaeger-span-01", long_ago).await;
    ctx.seed("jaeger-spans-2019-01-01", long_ago).await;
    ctx.seed(".kibana", long_ago).await;
    let date = NaiveDate::from_ymd_opt(2019, 1, 1).expect("valid date");
    let daily = ctx.seed_daily(Family::Service, date).await;

    let report = ctx.clean(0, true, true).await?;
    assert_eq!(report.evaluated, 5);
    assert_eq!(report.deleted, vec![daily]);
    Ok(())
}
