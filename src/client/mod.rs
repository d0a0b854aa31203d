//! Document-store clients.
//!
//! The [`DocumentClient`] trait is the seam between the storage core and a
//! single document-store account.  [`ords::OrdsClient`] talks to Oracle
//! REST Data Services over HTTPS; [`memory::MemoryDocumentClient`] keeps
//! collections in process.

pub mod memory;
pub mod ords;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

use crate::query::{PathFilter, QuerySpec};

/// The JSON document stored for every image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Logical file path, without a leading slash.
    pub path: String,
    /// JSON-serialized byte buffer.
    pub blob: String,
    /// MIME type of the image.
    #[serde(rename = "type", default)]
    pub content_type: String,
}

/// A hypermedia link attached to a stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub rel: String,
    pub href: String,
}

/// A document as returned by a collection query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub links: Vec<Link>,
    pub value: Document,
}

impl Item {
    /// The item's `self` link, or its first link when none is tagged.
    pub fn self_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "self")
            .or_else(|| self.links.first())
            .map(|link| link.href.as_str())
    }
}

/// Response body of a collection query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub count: u64,
}

/// Async client for one document-store account.
pub trait DocumentClient: Send + Sync + 'static {
    /// Base endpoint of the account, matched against item self links.
    fn endpoint(&self) -> &str;

    /// Run `spec` with `filter` against the collection `alias`.
    fn query(
        &self,
        alias: &str,
        spec: &QuerySpec,
        filter: &PathFilter,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<QueryResult>> + Send + '_>>;

    /// Insert `document` into the collection `alias`, returning its id.
    fn insert(
        &self,
        alias: &str,
        document: &Document,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;

    /// Delete the document `id` from the collection `alias`.
    fn delete(
        &self,
        alias: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}
