//! In-memory document client.
//!
//! Collections are held in a `tokio::sync::RwLock<HashMap<...>>` keyed by
//! alias.  Items carry the same shape as SODA responses, including a
//! `self` link rooted at the client's endpoint, so the storage core can
//! resolve ownership exactly as it does against ORDS.

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Document, DocumentClient, Item, Link, QueryResult};
use crate::query::{PathFilter, QuerySpec};

/// In-process document store for one account.
pub struct MemoryDocumentClient {
    /// Endpoint reported to the pool and used as the self-link root.
    endpoint: String,
    /// alias -> stored items, in insertion order.
    collections: tokio::sync::RwLock<HashMap<String, Vec<Item>>>,
    /// When set, every call fails as if the account were unreachable.
    unavailable: AtomicBool,
}

impl MemoryDocumentClient {
    /// Create an empty store reporting `endpoint`.
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collections: tokio::sync::RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage (`true`) or recover from one (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of documents stored in `alias`.
    pub async fn len(&self, alias: &str) -> usize {
        self.collections
            .read()
            .await
            .get(alias)
            .map_or(0, |items| items.len())
    }

    /// Whether `alias` holds no documents.
    pub async fn is_empty(&self, alias: &str) -> bool {
        self.len(alias).await == 0
    }

    fn check_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("{} is unavailable", self.endpoint);
        }
        Ok(())
    }

    /// SODA-style uppercase hex id.
    fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string().to_uppercase()
    }

    /// Content etag: the first 16 bytes of the blob's SHA-256, uppercase hex.
    fn compute_etag(blob: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(blob.as_bytes());
        hex::encode_upper(&hasher.finalize()[..16])
    }

    async fn do_query(
        &self,
        alias: &str,
        spec: QuerySpec,
        filter: &PathFilter,
    ) -> anyhow::Result<QueryResult> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let matches: Vec<&Item> = collections
            .get(alias)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.value.path == filter.path)
                    .collect()
            })
            .unwrap_or_default();

        let count = matches.len() as u64;
        let limit = spec.limit as usize;
        let items: Vec<Item> = matches.into_iter().take(limit).cloned().collect();
        Ok(QueryResult {
            has_more: (items.len() as u64) < count,
            count,
            items,
        })
    }

    async fn do_insert(&self, alias: &str, document: Document) -> anyhow::Result<String> {
        self.check_available()?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let mut collections = self.collections.write().await;
        let items = collections.entry(alias.to_string()).or_default();

        // Documents are keyed by path; a second insert replaces the first.
        if let Some(existing) = items.iter_mut().find(|i| i.value.path == document.path) {
            existing.etag = Self::compute_etag(&document.blob);
            existing.last_modified = Some(now);
            existing.value = document;
            return Ok(existing.id.clone());
        }

        let id = Self::new_id();
        items.push(Item {
            id: id.clone(),
            etag: Self::compute_etag(&document.blob),
            last_modified: Some(now.clone()),
            created: Some(now),
            links: vec![Link {
                rel: "self".to_string(),
                href: format!("{}/soda/latest/{}/{}", self.endpoint, alias, id),
            }],
            value: document,
        });
        Ok(id)
    }

    async fn do_delete(&self, alias: &str, id: &str) -> anyhow::Result<()> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let items = collections
            .get_mut(alias)
            .ok_or_else(|| anyhow::anyhow!("collection {alias} does not exist"))?;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            anyhow::bail!("document {id} not found in {alias}");
        }
        Ok(())
    }
}

impl DocumentClient for MemoryDocumentClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn query(
        &self,
        alias: &str,
        spec: &QuerySpec,
        filter: &PathFilter,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<QueryResult>> + Send + '_>> {
        let alias = alias.to_string();
        let spec = *spec;
        let filter = filter.clone();
        Box::pin(async move { self.do_query(&alias, spec, &filter).await })
    }

    fn insert(
        &self,
        alias: &str,
        document: &Document,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let alias = alias.to_string();
        let document = document.clone();
        Box::pin(async move { self.do_insert(&alias, document).await })
    }

    fn delete(
        &self,
        alias: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let alias = alias.to_string();
        let id = id.to_string();
        Box::pin(async move { self.do_delete(&alias, &id).await })
    }
}
