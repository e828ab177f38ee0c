//! Lifecycle test context combining an in-memory store, a manual clock and a prefix
//!
//! Provides the starting state shared by the cleaner scenarios: two legacy daily
//! span indices, the static archive index, and one rolled-over chain each for the
//! span and span-archive families.

use anyhow::Result;
use chrono::{DateTime, Duration as TimeDelta, NaiveDate, NaiveTime, TimeZone, Utc};
use common::clock::Clock;
use common::naming::{DEFAULT_DATE_SEPARATOR, Classifier, Family, IndexPrefix};
use common::store::{IndexStore, InMemoryIndexStore};
use lifecycle::{CleanReport, CleanerSettings, RetentionCleaner, RolloverConditions, RolloverEngine};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Deadline applied to every store call in tests
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// A clock that only moves when told to
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }

    /// A [`Clock`] reading this manual clock
    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().expect("clock lock poisoned"))
    }
}

/// Complete test context for rollover and retention testing
pub struct LifecycleTestContext {
    pub store: Arc<InMemoryIndexStore>,
    pub clock: ManualClock,
    pub prefix: IndexPrefix,
}

impl LifecycleTestContext {
    /// Creates a context scoped to `prefix`; an empty prefix means unscoped
    pub fn new(prefix: &str) -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 15, 10, 0, 0)
            .single()
            .expect("valid start time");
        let clock = ManualClock::new(start);
        let store = Arc::new(InMemoryIndexStore::new().with_clock(clock.clock()));

        Self {
            store,
            clock,
            prefix: IndexPrefix::new(prefix),
        }
    }

    /// Creates an unscoped context
    pub fn unscoped() -> Self {
        Self::new("")
    }

    /// A second tenant under `prefix` sharing this context's store and clock
    pub fn sharing(&self, prefix: &str) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            prefix: IndexPrefix::new(prefix),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn store_handle(&self) -> Arc<dyn IndexStore> {
        self.store.clone()
    }

    /// `raw` with this context's prefix applied
    pub fn name(&self, raw: &str) -> String {
        self.prefix.apply(raw)
    }

    pub fn engine(&self) -> RolloverEngine {
        RolloverEngine::new(self.store_handle(), self.prefix.clone(), STORE_TIMEOUT)
            .with_clock(self.clock.clock())
    }

    pub fn cleaner(&self, settings: CleanerSettings) -> Result<RetentionCleaner> {
        let classifier = Classifier::new(self.prefix.clone(), DEFAULT_DATE_SEPARATOR);
        let cleaner = RetentionCleaner::new(self.store_handle(), classifier, settings, STORE_TIMEOUT)?;
        Ok(cleaner.with_clock(self.clock.clock()))
    }

    /// Runs one cleaning pass with the given window and scope
    pub async fn clean(
        &self,
        window_days: u32,
        include_rollover: bool,
        include_archive: bool,
    ) -> Result<CleanReport> {
        let settings = CleanerSettings {
            window_days,
            include_rollover,
            include_archive,
            ..CleanerSettings::default()
        };
        self.cleaner(settings)?.clean().await
    }

    /// Seeds `raw` (prefix applied) with an explicit creation time
    pub async fn seed(&self, raw: &str, created_at: DateTime<Utc>) -> String {
        let name = self.name(raw);
        self.store.seed_index(name.clone(), created_at).await;
        name
    }

    /// Seeds the daily index of `family` for `date`, created at midnight of that day
    pub async fn seed_daily(&self, family: Family, date: NaiveDate) -> String {
        let name = family.daily_index(&self.prefix, date, DEFAULT_DATE_SEPARATOR);
        let created_at = date.and_time(NaiveTime::MIN).and_utc();
        self.store.seed_index(name.clone(), created_at).await;
        name
    }

    /// Seeds the shared cleaner scenario and leaves the clock one hour after the
    /// last rollover.
    ///
    /// Resulting indices (prefix applied):
    /// - `jaeger-span-2019-01-01`, `jaeger-span-2019-01-02`
    /// - `jaeger-span-archive` (static)
    /// - `jaeger-span-000001`, `jaeger-span-000002` (write alias on the latter)
    /// - `jaeger-span-archive-000001`, `jaeger-span-archive-000002` (write alias on the latter)
    pub async fn seed_scenario(&self) -> Result<()> {
        for day in [1, 2] {
            let date = NaiveDate::from_ymd_opt(2019, 1, day).expect("valid date");
            self.seed_daily(Family::Span, date).await;
        }
        self.seed("jaeger-span-archive", self.now() - TimeDelta::days(30))
            .await;

        let engine = self.engine();
        engine.init(Family::Span).await?;
        engine.init(Family::SpanArchive).await?;

        self.clock.advance(TimeDelta::hours(1));
        let always = RolloverConditions::always();
        engine.rollover(Family::Span, &always).await?;
        engine.rollover(Family::SpanArchive, &always).await?;

        self.clock.advance(TimeDelta::hours(1));
        Ok(())
    }

    /// Names of every stored index within this context's prefix, sorted
    pub async fn index_names(&self) -> Vec<String> {
        self.store
            .index_names()
            .await
            .into_iter()
            .filter(|name| self.prefix.contains(name))
            .collect()
    }

    /// `raw` names with the prefix applied, sorted like [`Self::index_names`]
    pub fn names(&self, raw: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = raw.iter().map(|raw| self.name(raw)).collect();
        names.sort();
        names
    }
}
