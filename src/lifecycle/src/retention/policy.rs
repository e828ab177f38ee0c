//! Keep/delete decisions for classified indices.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use common::naming::{IndexClass, IndexKind};
use common::store::IndexMeta;

use super::config::CleanerSettings;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Indices that must survive the run because a write alias points at them.
#[derive(Debug, Clone, Default)]
pub struct ProtectedSet {
    indices: BTreeSet<String>,
}

impl ProtectedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: impl Into<String>) {
        self.indices.insert(index.into());
    }

    pub fn contains(&self, index: &str) -> bool {
        self.indices.contains(index)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.indices.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// The name does not match any known shape.
    Unknown,
    Alias,
    /// A write alias points at the index.
    WriteTarget,
    /// The family or shape is not included in this run.
    OutOfScope,
    WithinWindow,
    /// The static archive index while the archive rollover chain is live.
    LiveArchiveChain,
}

impl fmt::Display for KeepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            KeepReason::Unknown => "unknown name",
            KeepReason::Alias => "alias",
            KeepReason::WriteTarget => "write alias target",
            KeepReason::OutOfScope => "not in scope",
            KeepReason::WithinWindow => "within retention window",
            KeepReason::LiveArchiveChain => "archive chain is live",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Delete,
    Keep(KeepReason),
}

/// Retention decisions for one run, evaluated against a fixed "now".
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    window_days: u32,
    include_rollover: bool,
    include_archive: bool,
    now: DateTime<Utc>,
}

impl RetentionPolicy {
    pub fn new(settings: &CleanerSettings, now: DateTime<Utc>) -> Self {
        Self {
            window_days: settings.window_days,
            include_rollover: settings.include_rollover,
            include_archive: settings.include_archive,
            now,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_days) * SECONDS_PER_DAY)
    }

    /// Human-readable representation for logging.
    pub fn display(&self) -> String {
        format!(
            "window={}, rollover={}, archive={}, now={}",
            humantime::format_duration(self.window()),
            self.include_rollover,
            self.include_archive,
            self.now.to_rfc3339(),
        )
    }

    /// Whether a daily index dated `date` has aged out.
    fn daily_expired(&self, date: chrono::NaiveDate) -> bool {
        (self.now.date_naive() - date).num_days() > i64::from(self.window_days)
    }

    /// Whether an index created at `created_at` has aged out.
    fn created_expired(&self, created_at: DateTime<Utc>) -> bool {
        (self.now - created_at)
            .to_std()
            .is_ok_and(|age| age > self.window())
    }

    /// Decide the fate of one listed index.
    ///
    /// `archive_chain_live` tells whether the archive family's write alias resolves.
    pub fn evaluate(
        &self,
        meta: &IndexMeta,
        class: Option<IndexClass>,
        protected: &ProtectedSet,
        archive_chain_live: bool,
    ) -> Verdict {
        let Some(class) = class else {
            return Verdict::Keep(KeepReason::Unknown);
        };
        if class.kind.is_alias() {
            return Verdict::Keep(KeepReason::Alias);
        }
        if protected.contains(&meta.name) {
            return Verdict::Keep(KeepReason::WriteTarget);
        }

        let archive = class.family.is_archive();
        let (in_scope, expired) = match class.kind {
            IndexKind::Daily { date } => {
                (!archive || self.include_archive, self.daily_expired(date))
            }
            IndexKind::Rollover { .. } => {
                let in_scope = if archive {
                    self.include_archive
                } else {
                    self.include_rollover
                };
                (in_scope, self.created_expired(meta.created_at))
            }
            IndexKind::StaticArchive => {
                if self.include_archive && archive_chain_live {
                    return Verdict::Keep(KeepReason::LiveArchiveChain);
                }
                (self.include_archive, self.created_expired(meta.created_at))
            }
            IndexKind::WriteAlias | IndexKind::ReadAlias => {
                return Verdict::Keep(KeepReason::Alias);
            }
        };

        if !in_scope {
            Verdict::Keep(KeepReason::OutOfScope)
        } else if expired {
            Verdict::Delete
        } else {
            Verdict::Keep(KeepReason::WithinWindow)
        }
    }
}
