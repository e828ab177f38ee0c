//! Index store backed by the Elasticsearch/OpenSearch admin API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use super::{IndexMeta, IndexStore, StoreError, StoreResult};
use crate::config::StoreConfig;
use crate::naming::IndexPrefix;

pub mod client;
pub mod protocol;

pub use client::EsClient;
pub use protocol::{
    AliasMember, Distribution, LegacyProtocol, ModernProtocol, Protocol, ServerVersion,
};

/// Shard layout applied to every index the store creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    pub shards: u32,
    pub replicas: u32,
}

/// Connect to the configured cluster and pick the protocol for its version.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn IndexStore>> {
    let client = EsClient::new(
        &config.url,
        config.username.as_deref(),
        config.password.as_deref(),
        config.timeout,
    )?;
    let root: Value = client.get("/", "server_info", client.base_url()).await?;
    let version = ServerVersion::from_root_response(&root)?;
    let settings = IndexSettings {
        shards: config.shards,
        replicas: config.replicas,
    };

    if LegacyProtocol::supports(&version) {
        tracing::info!(%version, protocol = LegacyProtocol::NAME, "Connected to index store");
        Ok(Arc::new(ElasticsearchStore::<LegacyProtocol>::new(
            client, settings, version,
        )))
    } else if ModernProtocol::supports(&version) {
        tracing::info!(%version, protocol = ModernProtocol::NAME, "Connected to index store");
        Ok(Arc::new(ElasticsearchStore::<ModernProtocol>::new(
            client, settings, version,
        )))
    } else {
        Err(StoreError::StoreUnavailable(format!(
            "No supported protocol for {version}"
        )))
    }
}

/// Index store speaking protocol generation `P`.
#[derive(Debug)]
pub struct ElasticsearchStore<P: Protocol> {
    client: EsClient,
    settings: IndexSettings,
    version: ServerVersion,
    _protocol: PhantomData<P>,
}

#[derive(Deserialize)]
struct SettingsEntry {
    settings: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct AliasesEntry {
    #[serde(default)]
    aliases: HashMap<String, AliasProps>,
}

#[derive(Deserialize, Default)]
struct AliasProps {
    #[serde(default)]
    is_write_index: Option<bool>,
}

const CREATION_DATE: &str = "index.creation_date";

impl<P: Protocol> ElasticsearchStore<P> {
    pub fn new(client: EsClient, settings: IndexSettings, version: ServerVersion) -> Self {
        Self {
            client,
            settings,
            version,
            _protocol: PhantomData,
        }
    }

    pub fn version(&self) -> &ServerVersion {
        &self.version
    }

    async fn describe(
        &self,
        pattern: &str,
        operation: &'static str,
    ) -> StoreResult<Vec<IndexMeta>> {
        let params = P::wildcard_params();
        let settings: HashMap<String, SettingsEntry> = self
            .client
            .get(
                &format!("/{pattern}/_settings/{CREATION_DATE}?flat_settings=true{params}"),
                operation,
                pattern,
            )
            .await?;
        let mut aliases: HashMap<String, AliasesEntry> = self
            .client
            .get(&format!("/{pattern}/_alias?ignore_unavailable=true{params}"), operation, pattern)
            .await?;

        let mut metas = Vec::with_capacity(settings.len());
        for (name, entry) in settings {
            let created_at = creation_date(&name, &entry)?;
            let aliases = aliases
                .remove(&name)
                .map(|entry| entry.aliases.into_keys().collect())
                .unwrap_or_else(BTreeSet::new);
            metas.push(IndexMeta {
                name,
                created_at,
                aliases,
            });
        }
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metas)
    }

    async fn update_aliases(
        &self,
        actions: Vec<Value>,
        operation: &'static str,
        alias: &str,
    ) -> StoreResult<()> {
        let body = json!({ "actions": actions });
        self.client
            .send(Method::POST, "/_aliases", Some(&body), operation, alias)
            .await
    }

    async fn alias_members(&self, alias: &str) -> StoreResult<Vec<AliasMember>> {
        let result: StoreResult<HashMap<String, AliasesEntry>> = self
            .client
            .get(&format!("/_alias/{alias}"), "alias_targets", alias)
            .await;

        let entries = match result {
            Ok(entries) => entries,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut members: Vec<AliasMember> = entries
            .into_iter()
            .map(|(index, mut entry)| AliasMember {
                is_write_index: entry
                    .aliases
                    .remove(alias)
                    .unwrap_or_default()
                    .is_write_index,
                index,
            })
            .collect();
        members.sort_by(|a, b| a.index.cmp(&b.index));
        Ok(members)
    }
}

fn creation_date(name: &str, entry: &SettingsEntry) -> StoreResult<DateTime<Utc>> {
    let millis = match entry.settings.get(CREATION_DATE) {
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    };
    millis
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| StoreError::Api {
            operation: "list_indices",
            target: name.to_string(),
            status: 200,
            message: format!("missing or invalid {CREATION_DATE}"),
        })
}

#[async_trait]
impl<P: Protocol> IndexStore for ElasticsearchStore<P> {
    async fn list_indices(&self, prefix: &IndexPrefix) -> StoreResult<Vec<IndexMeta>> {
        let metas = self.describe(&prefix.pattern(), "list_indices").await?;
        Ok(metas
            .into_iter()
            .filter(|meta| prefix.contains(&meta.name))
            .collect())
    }

    async fn index_meta(&self, name: &str) -> StoreResult<IndexMeta> {
        self.describe(name, "index_meta")
            .await?
            .into_iter()
            .find(|meta| meta.name == name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn create_index(&self, name: &str) -> StoreResult<()> {
        let body = json!({
            "settings": {
                "index": {
                    "number_of_shards": self.settings.shards,
                    "number_of_replicas": self.settings.replicas,
                }
            }
        });
        self.client
            .send(Method::PUT, &format!("/{name}"), Some(&body), "create_index", name)
            .await
    }

    async fn delete_index(&self, name: &str) -> StoreResult<()> {
        self.client
            .send(Method::DELETE, &format!("/{name}"), None, "delete_index", name)
            .await
    }

    async fn create_alias(&self, alias: &str, target: &str) -> StoreResult<()> {
        let actions = vec![json!({ "add": { "index": target, "alias": alias } })];
        self.update_aliases(actions, "create_alias", alias).await
    }

    async fn repoint_alias(
        &self,
        alias: &str,
        old_target: &str,
        new_target: &str,
    ) -> StoreResult<()> {
        let actions = vec![
            json!({ "remove": { "index": old_target, "alias": alias } }),
            json!({ "add": { "index": new_target, "alias": alias } }),
        ];
        match self.update_aliases(actions, "repoint_alias", alias).await {
            // The remove half names an alias membership that no longer exists.
            Err(StoreError::Api { status: 404, .. }) => Err(StoreError::Conflict {
                alias: alias.to_string(),
                expected: old_target.to_string(),
            }),
            Err(StoreError::NotFound(index)) if index == old_target => {
                Err(StoreError::Conflict {
                    alias: alias.to_string(),
                    expected: old_target.to_string(),
                })
            }
            other => other,
        }
    }

    async fn alias_targets(&self, alias: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .alias_members(alias)
            .await?
            .into_iter()
            .map(|m| m.index)
            .collect())
    }

    async fn remove_alias(&self, alias: &str, targets: &[String]) -> StoreResult<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let actions = targets
            .iter()
            .map(|index| json!({ "remove": { "index": index, "alias": alias } }))
            .collect();
        self.update_aliases(actions, "remove_alias", alias).await
    }

    async fn resolve_alias(&self, alias: &str) -> StoreResult<Option<String>> {
        let members = self.alias_members(alias).await?;
        P::write_target(alias, members)
    }
}
