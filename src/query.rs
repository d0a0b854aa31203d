//! Lookup-by-path across the account pool.
//!
//! Every lookup sends the same collection query to all accounts at once
//! and then consumes the answers in pool order, so the first account (in
//! configuration order) that holds the path wins regardless of which one
//! answers first.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::client::Item;
use crate::errors::StorageError;
use crate::metrics::STORE_OPERATIONS_TOTAL;
use crate::pool::AccountPool;

/// Fixed collection query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySpec {
    pub action: &'static str,
    pub fields: &'static str,
    pub limit: u32,
    pub total_results: bool,
}

/// The query used for every path lookup.
pub const QUERY_SPEC: QuerySpec = QuerySpec {
    action: "query",
    fields: "all",
    limit: 1,
    total_results: true,
};

impl QuerySpec {
    /// Query-string parameters, in wire order.
    pub fn params(&self) -> [(&'static str, String); 4] {
        [
            ("action", self.action.to_string()),
            ("fields", self.fields.to_string()),
            ("limit", self.limit.to_string()),
            ("totalResults", self.total_results.to_string()),
        ]
    }
}

/// Query-by-example filter matching a document's `path` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFilter {
    pub path: String,
}

/// Strip one leading `/`, if present.
pub fn normalize(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Filter payload for `path`, normalized.
pub fn build_payload(path: &str) -> PathFilter {
    PathFilter {
        path: normalize(path).to_string(),
    }
}

/// Find the document stored under `file` on any account.
///
/// All queries are spawned up front.  Results are awaited in pool order and
/// the first one reporting exactly one match is returned; tasks still in
/// flight at that point are detached, not cancelled.  A failed query stops
/// the lookup when its turn comes.  `NotFound` carries `file` as given.
pub async fn lookup(pool: &AccountPool, file: &str) -> Result<Item, StorageError> {
    let payload = build_payload(file);

    let pending: Vec<_> = pool
        .accounts()
        .iter()
        .map(|account| {
            let client = Arc::clone(&account.client);
            let alias = account.alias.clone();
            let payload = payload.clone();
            let handle =
                tokio::spawn(async move { client.query(&alias, &QUERY_SPEC, &payload).await });
            (account.alias.as_str(), handle)
        })
        .collect();

    for (alias, handle) in pending {
        let result = match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                counter!(STORE_OPERATIONS_TOTAL, "operation" => "query", "account" => alias.to_string(), "status" => "error").increment(1);
                return Err(StorageError::store(alias, e));
            }
            Err(e) => {
                return Err(StorageError::store(
                    alias,
                    anyhow::anyhow!("query task failed: {e}"),
                ));
            }
        };
        counter!(STORE_OPERATIONS_TOTAL, "operation" => "query", "account" => alias.to_string(), "status" => "ok").increment(1);

        if result.count == 1 && result.items.len() == 1 {
            if let Some(item) = result.items.into_iter().next() {
                debug!("Found {} on account '{}' (id={})", file, alias, item.id);
                return Ok(item);
            }
        }
    }

    Err(StorageError::NotFound {
        file: file.to_string(),
    })
}
