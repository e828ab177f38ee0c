//! Server generations and how their admin APIs differ.

use serde::Deserialize;
use std::fmt;

use crate::store::{StoreError, StoreResult};

/// Product line reported by the server root endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    Elasticsearch,
    OpenSearch,
}

/// Version reported by `GET /`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub distribution: Distribution,
    pub number: String,
    pub major: u64,
}

#[derive(Deserialize)]
struct RootResponse {
    version: VersionInfo,
}

#[derive(Deserialize)]
struct VersionInfo {
    number: String,
    #[serde(default)]
    distribution: Option<String>,
}

impl ServerVersion {
    /// Parse the body of the root endpoint.
    pub fn from_root_response(body: &serde_json::Value) -> StoreResult<Self> {
        let root: RootResponse = serde_json::from_value(body.clone()).map_err(|e| {
            StoreError::StoreUnavailable(format!("Server did not report a version: {e}"))
        })?;

        let major = root
            .version
            .number
            .split('.')
            .next()
            .and_then(|major| major.parse::<u64>().ok())
            .ok_or_else(|| {
                StoreError::StoreUnavailable(format!(
                    "Unparsable server version '{}'",
                    root.version.number
                ))
            })?;

        let distribution = match root.version.distribution.as_deref() {
            Some("opensearch") => Distribution::OpenSearch,
            _ => Distribution::Elasticsearch,
        };

        Ok(Self {
            distribution,
            number: root.version.number,
            major,
        })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.distribution {
            Distribution::Elasticsearch => write!(f, "Elasticsearch {}", self.number),
            Distribution::OpenSearch => write!(f, "OpenSearch {}", self.number),
        }
    }
}

/// One alias membership as reported by `GET /_alias/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasMember {
    pub index: String,
    pub is_write_index: Option<bool>,
}

/// Differences between server generations behind one store implementation.
pub trait Protocol: fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;

    fn supports(version: &ServerVersion) -> bool;

    /// Query parameters appended to wildcard reads.
    fn wildcard_params() -> &'static str;

    /// Pick the write target out of an alias's members.
    fn write_target(alias: &str, members: Vec<AliasMember>) -> StoreResult<Option<String>>;
}

/// Elasticsearch 5.x and 6.x: aliases carry no write flag.
#[derive(Debug, Clone, Copy)]
pub struct LegacyProtocol;

/// Elasticsearch 7.x/8.x and OpenSearch: a write alias may span several indices,
/// one of which is flagged `is_write_index`.
#[derive(Debug, Clone, Copy)]
pub struct ModernProtocol;

fn single_target(alias: &str, members: Vec<AliasMember>) -> StoreResult<Option<String>> {
    let mut targets: Vec<String> = members.into_iter().map(|m| m.index).collect();
    match targets.len() {
        0 => Ok(None),
        1 => Ok(targets.pop()),
        _ => Err(StoreError::AmbiguousAlias {
            alias: alias.to_string(),
            targets,
        }),
    }
}

impl Protocol for LegacyProtocol {
    const NAME: &'static str = "legacy";

    fn supports(version: &ServerVersion) -> bool {
        version.distribution == Distribution::Elasticsearch && matches!(version.major, 5 | 6)
    }

    fn wildcard_params() -> &'static str {
        "&expand_wildcards=open,closed"
    }

    fn write_target(alias: &str, members: Vec<AliasMember>) -> StoreResult<Option<String>> {
        single_target(alias, members)
    }
}

impl Protocol for ModernProtocol {
    const NAME: &'static str = "modern";

    fn supports(version: &ServerVersion) -> bool {
        match version.distribution {
            Distribution::Elasticsearch => matches!(version.major, 7 | 8),
            Distribution::OpenSearch => matches!(version.major, 1 | 2),
        }
    }

    fn wildcard_params() -> &'static str {
        "&expand_wildcards=open,closed"
    }

    fn write_target(alias: &str, members: Vec<AliasMember>) -> StoreResult<Option<String>> {
        if let Some(flagged) = members
            .iter()
            .find(|m| m.is_write_index == Some(true))
        {
            return Ok(Some(flagged.index.clone()));
        }
        single_target(alias, members)
    }
}
