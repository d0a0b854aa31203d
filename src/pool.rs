//! Account pool.
//!
//! Holds every configured document-store account in configuration order.
//! Writes are spread round-robin; reads and deletes probe every account
//! because the pool does not track which account holds which path.

use reqwest::Url;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::client::memory::MemoryDocumentClient;
use crate::client::ords::OrdsClient;
use crate::client::DocumentClient;
use crate::config::{AccountConfig, AccountKind};
use crate::errors::StorageError;

/// A document-store account: a collection alias plus the client for it.
#[derive(Clone)]
pub struct Account {
    pub alias: String,
    pub client: Arc<dyn DocumentClient>,
}

impl Account {
    pub fn new(alias: impl Into<String>, client: Arc<dyn DocumentClient>) -> Self {
        Self {
            alias: alias.into(),
            client,
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("alias", &self.alias)
            .field("endpoint", &self.client.endpoint())
            .finish()
    }
}

/// An endpoint URL reduced to what ownership is decided on.
///
/// Default ports are made explicit, so `https://h/ords` and
/// `https://h:443/ords` compare equal.  Empty path segments are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EndpointKey {
    scheme: String,
    host: String,
    port: Option<u16>,
    segments: Vec<String>,
}

impl EndpointKey {
    fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let segments = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            scheme: url.scheme().to_string(),
            host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            port: url.port_or_known_default(),
            segments,
        })
    }

    /// Whether `other` lives at or below this endpoint, on whole segments.
    fn contains(&self, other: &EndpointKey) -> bool {
        self.scheme == other.scheme
            && self.host == other.host
            && self.port == other.port
            && other.segments.starts_with(&self.segments)
    }
}

/// Ordered set of accounts with a round-robin write cursor.
#[derive(Debug)]
pub struct AccountPool {
    accounts: Vec<Account>,
    /// Parsed endpoint of each account, same order as `accounts`.
    endpoints: Vec<EndpointKey>,
    /// Index of the account that received the most recent write.
    last_used: Mutex<Option<usize>>,
}

impl AccountPool {
    /// Build a pool from ready-made accounts.
    ///
    /// Rejects an empty list, empty aliases, unparseable endpoints, and
    /// endpoints that equal or contain one another (ownership of a stored
    /// item could not be resolved).
    pub fn new(accounts: Vec<Account>) -> Result<Self, StorageError> {
        if accounts.is_empty() {
            return Err(StorageError::Config(
                "at least one account is required".to_string(),
            ));
        }
        let mut endpoints: Vec<EndpointKey> = Vec::with_capacity(accounts.len());
        for account in &accounts {
            if account.alias.is_empty() {
                return Err(StorageError::Config("account alias is empty".to_string()));
            }
            let endpoint = account.client.endpoint();
            let key = EndpointKey::parse(endpoint).ok_or_else(|| {
                StorageError::Config(format!(
                    "account '{}': invalid endpoint '{}'",
                    account.alias, endpoint
                ))
            })?;
            if let Some(index) = endpoints
                .iter()
                .position(|seen| seen.contains(&key) || key.contains(seen))
            {
                return Err(StorageError::Config(format!(
                    "account endpoint '{}' overlaps '{}'",
                    endpoint,
                    accounts[index].client.endpoint()
                )));
            }
            endpoints.push(key);
        }
        Ok(Self {
            accounts,
            endpoints,
            last_used: Mutex::new(None),
        })
    }

    /// Build one client per configured account.
    ///
    /// Any malformed credential set fails the whole pool.
    pub fn from_config(configs: &[AccountConfig], timeout: Duration) -> Result<Self, StorageError> {
        let mut accounts = Vec::with_capacity(configs.len());
        for config in configs {
            let client: Arc<dyn DocumentClient> = match config.kind {
                AccountKind::Ords => {
                    let secret = config.resolved_secret().unwrap_or_default();
                    let client =
                        OrdsClient::new(&config.ords_url, &config.client_id, &secret, timeout)
                            .map_err(|e| {
                                StorageError::Config(format!("account '{}': {e}", config.alias))
                            })?;
                    Arc::new(client)
                }
                AccountKind::Memory => {
                    let endpoint = if config.ords_url.is_empty() {
                        format!("memory://{}", config.alias)
                    } else {
                        config.ords_url.clone()
                    };
                    Arc::new(MemoryDocumentClient::new(&endpoint))
                }
            };
            info!(
                "Account '{}' configured: kind={:?} endpoint={}",
                config.alias,
                config.kind,
                client.endpoint()
            );
            accounts.push(Account::new(config.alias.clone(), client));
        }
        Self::new(accounts)
    }

    /// Pick the account for the next write.
    ///
    /// Returns the account after the last-used one, wrapping around, or
    /// the first account when nothing has been written yet.  The cursor is
    /// read and advanced under a single lock acquisition.
    pub fn select_for_write(&self) -> &Account {
        let mut last_used = self.last_used.lock().unwrap_or_else(|e| e.into_inner());
        let next = match *last_used {
            Some(index) if index + 1 < self.accounts.len() => index + 1,
            _ => 0,
        };
        *last_used = Some(next);
        &self.accounts[next]
    }

    /// Every account, in pool order.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// The account whose endpoint contains `href`.
    ///
    /// Scheme, host and port (default ports filled in) must match, and the
    /// endpoint path must be a whole-segment prefix of the link path.
    pub fn owner_of(&self, href: &str) -> Option<&Account> {
        let link = EndpointKey::parse(href)?;
        self.endpoints
            .iter()
            .position(|endpoint| endpoint.contains(&link))
            .map(|index| &self.accounts[index])
    }
}
