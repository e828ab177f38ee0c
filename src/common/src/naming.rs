//! Index and alias naming for the span, service, dependencies and archive families.
//!
//! Two naming schemes share one cluster:
//!
//! - daily indices: `<prefix>-jaeger-span-2019-01-01`, one per family per day
//! - rollover indices: `<prefix>-jaeger-span-000002`, chained behind a write alias
//!   (`<prefix>-jaeger-span-write`) and collected under a read alias
//!   (`<prefix>-jaeger-span-read`)
//!
//! plus the static `<prefix>-jaeger-span-archive` index. [`Classifier`] maps a
//! listed name back onto this model; anything it does not recognize is left alone.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum width of the numeric suffix of a rollover index.
pub const SEQUENCE_WIDTH: usize = 6;

const WRITE_ALIAS_SUFFIX: &str = "write";
const READ_ALIAS_SUFFIX: &str = "read";

/// Default separator between the year, month and day of a daily index.
pub const DEFAULT_DATE_SEPARATOR: &str = "-";

/// Prefix scoping an index family to one tenant or deployment.
///
/// An empty prefix is the unscoped (legacy) tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct IndexPrefix(String);

impl IndexPrefix {
    /// Create a prefix. A trailing `-` is accepted and dropped.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self(prefix.trim().trim_end_matches('-').to_string())
    }

    /// The unscoped prefix.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prepend `<prefix>-` to `name`.
    pub fn apply(&self, name: &str) -> String {
        if self.0.is_empty() {
            name.to_string()
        } else {
            format!("{}-{name}", self.0)
        }
    }

    /// Strip `<prefix>-` from `name`, or `None` if the name lies outside this scope.
    pub fn strip<'a>(&self, name: &'a str) -> Option<&'a str> {
        if self.0.is_empty() {
            return Some(name);
        }
        name.strip_prefix(self.0.as_str())?.strip_prefix('-')
    }

    /// Whether `name` lies inside this scope.
    pub fn contains(&self, name: &str) -> bool {
        self.strip(name).is_some()
    }

    /// Wildcard expression matching every index in this scope.
    pub fn pattern(&self) -> String {
        self.apply("*")
    }
}

impl From<String> for IndexPrefix {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for IndexPrefix {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<IndexPrefix> for String {
    fn from(value: IndexPrefix) -> Self {
        value.0
    }
}

impl fmt::Display for IndexPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<none>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A logical data type with its own chain of indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    Span,
    Service,
    Dependencies,
    SpanArchive,
}

impl Family {
    /// Every family, in classification order (longest stem first).
    pub const ALL: [Family; 4] = [
        Family::SpanArchive,
        Family::Dependencies,
        Family::Service,
        Family::Span,
    ];

    /// Families that share the main retention cutoff.
    pub const MAIN: [Family; 3] = [Family::Span, Family::Service, Family::Dependencies];

    /// Families the rollover engine manages in the given mode.
    pub fn for_mode(archive: bool) -> &'static [Family] {
        if archive {
            &[Family::SpanArchive]
        } else {
            &Self::MAIN
        }
    }

    /// Index name stem shared by every index of the family.
    pub fn stem(self) -> &'static str {
        match self {
            Family::Span => "jaeger-span",
            Family::Service => "jaeger-service",
            Family::Dependencies => "jaeger-dependencies",
            Family::SpanArchive => "jaeger-span-archive",
        }
    }

    pub fn is_archive(self) -> bool {
        matches!(self, Family::SpanArchive)
    }

    /// Alias every new write of the family goes through.
    pub fn write_alias(self, prefix: &IndexPrefix) -> String {
        prefix.apply(&format!("{}-{WRITE_ALIAS_SUFFIX}", self.stem()))
    }

    /// Alias spanning every searchable index of the family.
    pub fn read_alias(self, prefix: &IndexPrefix) -> String {
        prefix.apply(&format!("{}-{READ_ALIAS_SUFFIX}", self.stem()))
    }

    /// Rollover index with the given sequence number.
    pub fn rollover_index(self, prefix: &IndexPrefix, sequence: u64) -> String {
        prefix.apply(&format!(
            "{}-{sequence:0width$}",
            self.stem(),
            width = SEQUENCE_WIDTH
        ))
    }

    /// Legacy daily index for `date`.
    pub fn daily_index(self, prefix: &IndexPrefix, date: NaiveDate, separator: &str) -> String {
        let date = date
            .format(&format!("%Y{separator}%m{separator}%d"))
            .to_string();
        prefix.apply(&format!("{}-{date}", self.stem()))
    }

    /// The static archive index, only defined for the archive family.
    pub fn static_archive_index(self, prefix: &IndexPrefix) -> Option<String> {
        self.is_archive().then(|| prefix.apply(self.stem()))
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Span => "span",
            Family::Service => "service",
            Family::Dependencies => "dependencies",
            Family::SpanArchive => "span-archive",
        };
        f.write_str(name)
    }
}

/// Shape of a recognized index or alias name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Daily { date: NaiveDate },
    Rollover { sequence: u64 },
    StaticArchive,
    WriteAlias,
    ReadAlias,
}

impl IndexKind {
    pub fn is_alias(self) -> bool {
        matches!(self, IndexKind::WriteAlias | IndexKind::ReadAlias)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Daily { date } => write!(f, "daily({date})"),
            IndexKind::Rollover { sequence } => write!(f, "rollover({sequence})"),
            IndexKind::StaticArchive => f.write_str("static-archive"),
            IndexKind::WriteAlias => f.write_str("write-alias"),
            IndexKind::ReadAlias => f.write_str("read-alias"),
        }
    }
}

/// Family and shape of a recognized name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexClass {
    pub family: Family,
    pub kind: IndexKind,
}

impl IndexClass {
    /// Name of the index that follows this one in its rollover chain.
    ///
    /// Only rollover indices and the static archive index have a successor.
    pub fn successor(&self, prefix: &IndexPrefix) -> Option<String> {
        match self.kind {
            IndexKind::Rollover { sequence } => {
                Some(self.family.rollover_index(prefix, sequence.checked_add(1)?))
            }
            IndexKind::StaticArchive => Some(self.family.rollover_index(prefix, 1)),
            _ => None,
        }
    }
}

/// Maps names inside one prefix scope onto families and shapes.
#[derive(Debug, Clone)]
pub struct Classifier {
    prefix: IndexPrefix,
    date_separator: String,
}

impl Classifier {
    pub fn new(prefix: IndexPrefix, date_separator: impl Into<String>) -> Self {
        Self {
            prefix,
            date_separator: date_separator.into(),
        }
    }

    pub fn prefix(&self) -> &IndexPrefix {
        &self.prefix
    }

    /// Classify `name`. `None` means the name is unknown and must not be touched.
    pub fn classify(&self, name: &str) -> Option<IndexClass> {
        let rest = self.prefix.strip(name)?;

        for family in Family::ALL {
            let Some(suffix) = rest.strip_prefix(family.stem()) else {
                continue;
            };

            if suffix.is_empty() {
                if family.is_archive() {
                    return Some(IndexClass {
                        family,
                        kind: IndexKind::StaticArchive,
                    });
                }
                continue;
            }

            let Some(suffix) = suffix.strip_prefix('-') else {
                continue;
            };

            if let Some(kind) = self.parse_suffix(suffix) {
                return Some(IndexClass { family, kind });
            }
        }

        None
    }

    fn parse_suffix(&self, suffix: &str) -> Option<IndexKind> {
        match suffix {
            WRITE_ALIAS_SUFFIX => return Some(IndexKind::WriteAlias),
            READ_ALIAS_SUFFIX => return Some(IndexKind::ReadAlias),
            _ => {}
        }

        // Daily first: with an empty separator a date is also a run of digits.
        if let Some(date) = self.parse_date(suffix) {
            return Some(IndexKind::Daily { date });
        }

        if suffix.len() >= SEQUENCE_WIDTH && suffix.bytes().all(|b| b.is_ascii_digit()) {
            return suffix
                .parse::<u64>()
                .ok()
                .map(|sequence| IndexKind::Rollover { sequence });
        }

        None
    }

    fn parse_date(&self, suffix: &str) -> Option<NaiveDate> {
        let sep = self.date_separator.as_str();
        if suffix.len() != 8 + 2 * sep.len() {
            return None;
        }

        let (year, rest) = suffix.split_at_checked(4)?;
        let rest = rest.strip_prefix(sep)?;
        let (month, rest) = rest.split_at_checked(2)?;
        let day = rest.strip_prefix(sep)?;

        if ![year, month, day]
            .iter()
            .all(|part| part.bytes().all(|b| b.is_ascii_digit()))
        {
            return None;
        }

        NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
    }
}
