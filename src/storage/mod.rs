//! Image storage core.
//!
//! [`ImageStorage`] implements the host's storage contract on top of the
//! account pool: `save` writes round-robin, `read`/`exists`/`delete` find
//! the document with a fan-out lookup.  `exists` and `delete` report plain
//! booleans and never surface errors.

pub mod naming;

use bytes::Bytes;
use metrics::counter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec;
use crate::errors::StorageError;
use crate::metrics::STORE_OPERATIONS_TOTAL;
use crate::pool::AccountPool;
use crate::query::{self, lookup};

use naming::{SuffixNamer, UniqueNamer};

/// An uploaded image waiting to be stored.
#[derive(Debug, Clone)]
pub struct Image {
    /// Temporary file holding the upload.
    pub path: PathBuf,
    /// Original file name, used to derive the stored name.
    pub name: String,
    /// MIME type.
    pub content_type: String,
}

/// A decoded image ready to be written to an HTTP response.
#[derive(Debug, Clone)]
pub struct ServedImage {
    pub content_type: String,
    pub data: Bytes,
    /// RFC 3339 timestamp reported by the store.
    pub last_modified: Option<String>,
}

/// Storage adapter over a pool of document-store accounts.
pub struct ImageStorage {
    pool: AccountPool,
    url_prefix: String,
    namer: Arc<dyn UniqueNamer>,
}

impl ImageStorage {
    /// Create a storage core publishing URLs under `url_prefix`
    /// (e.g. `/content/images`).  The prefix is stored with one leading
    /// `/` and no trailing one; `/` alone becomes the empty prefix.
    pub fn new(pool: AccountPool, url_prefix: &str) -> Self {
        Self {
            pool,
            url_prefix: normalize_prefix(url_prefix),
            namer: Arc::new(SuffixNamer),
        }
    }

    /// Replace the unique file name policy.
    pub fn with_namer(mut self, namer: Arc<dyn UniqueNamer>) -> Self {
        self.namer = namer;
        self
    }

    pub fn pool(&self) -> &AccountPool {
        &self.pool
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Store `image` under `target_dir` (default: [`default_target_dir`]) and
    /// return its public URL.
    ///
    /// The unique name and the file contents are resolved concurrently.
    /// Read and write failures propagate.
    pub async fn save(&self, image: &Image, target_dir: Option<&str>) -> Result<String, StorageError> {
        let dir = target_dir.map_or_else(default_target_dir, str::to_string);

        let (file_name, data) = tokio::try_join!(
            self.namer.unique_file_name(self, image, &dir),
            async {
                tokio::fs::read(&image.path)
                    .await
                    .map_err(StorageError::from)
            },
        )?;

        let path = query::normalize(&join(&dir, &file_name)).to_string();
        let account = self.pool.select_for_write();
        let document = codec::encode(&path, &data, &image.content_type)?;

        let id = match account.client.insert(&account.alias, &document).await {
            Ok(id) => id,
            Err(e) => {
                counter!(STORE_OPERATIONS_TOTAL, "operation" => "insert", "account" => account.alias.clone(), "status" => "error").increment(1);
                return Err(StorageError::store(&account.alias, e));
            }
        };
        counter!(STORE_OPERATIONS_TOTAL, "operation" => "insert", "account" => account.alias.clone(), "status" => "ok").increment(1);

        info!(
            "Saved {} ({} bytes, {}) to account '{}' id={}",
            path,
            data.len(),
            image.content_type,
            account.alias,
            id
        );
        Ok(self.public_url(&path))
    }

    /// Whether `file_name` is stored under `target_dir` on any account.
    ///
    /// Any lookup failure counts as "does not exist".
    pub async fn exists(&self, file_name: &str, target_dir: &str) -> bool {
        let path = join(target_dir, file_name);
        match lookup(&self.pool, &path).await {
            Ok(_) => true,
            Err(e) => {
                if !e.is_not_found() {
                    debug!("exists({}) treated as missing: {}", path, e);
                }
                false
            }
        }
    }

    /// Remove `file_name` from `target_dir` (default: [`default_target_dir`]).
    ///
    /// Returns `true` when the document was deleted or was never stored,
    /// and `false` on any other failure.
    pub async fn delete(&self, file_name: &str, target_dir: Option<&str>) -> bool {
        let dir = target_dir.map_or_else(default_target_dir, str::to_string);
        let path = join(&dir, file_name);
        match self.remove(&path).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!("delete({}) failed: {}", path, e);
                false
            }
        }
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let item = lookup(&self.pool, path).await?;
        let href = item.self_link().unwrap_or_default();
        let owner = self
            .pool
            .owner_of(href)
            .ok_or_else(|| StorageError::OwnershipUnresolved {
                href: href.to_string(),
            })?;

        if let Err(e) = owner.client.delete(&owner.alias, &item.id).await {
            counter!(STORE_OPERATIONS_TOTAL, "operation" => "delete", "account" => owner.alias.clone(), "status" => "error").increment(1);
            return Err(StorageError::store(&owner.alias, e));
        }
        counter!(STORE_OPERATIONS_TOTAL, "operation" => "delete", "account" => owner.alias.clone(), "status" => "ok").increment(1);

        info!("Deleted {} from account '{}' id={}", path, owner.alias, item.id);
        Ok(())
    }

    /// Read the bytes stored at `path`.
    ///
    /// One trailing `/` or `\` is ignored.  Errors, including `NotFound`,
    /// propagate.
    pub async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let path = strip_trailing_separator(path);
        let item = lookup(&self.pool, path).await?;
        codec::decode(&item)
    }

    /// Look up the image at a request path and decode it for serving.
    pub async fn fetch(&self, request_path: &str) -> Result<ServedImage, StorageError> {
        let item = lookup(&self.pool, request_path).await?;
        let data = codec::decode(&item)?;
        Ok(ServedImage {
            content_type: item.value.content_type,
            data,
            last_modified: item.last_modified,
        })
    }

    /// Public URL for a stored path: `{url_prefix}/{path}`.
    pub fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.url_prefix, query::normalize(path))
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Default upload directory: `YYYY/MM` of the current UTC date.
pub fn default_target_dir() -> String {
    chrono::Utc::now().format("%Y/%m").to_string()
}

/// Join a directory and a file name with a single `/`.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches(['/', '\\']);
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Strip exactly one trailing `/` or `\`.
pub fn strip_trailing_separator(path: &str) -> &str {
    path.strip_suffix('/')
        .or_else(|| path.strip_suffix('\\'))
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryDocumentClient;
    use crate::client::DocumentClient;
    use crate::pool::Account;
    use std::io::Write;

    fn memory_clients(n: usize) -> Vec<Arc<MemoryDocumentClient>> {
        (0..n)
            .map(|i| Arc::new(MemoryDocumentClient::new(&format!("memory://account{i}"))))
            .collect()
    }

    fn storage_over(clients: &[Arc<MemoryDocumentClient>]) -> ImageStorage {
        let accounts = clients
            .iter()
            .enumerate()
            .map(|(i, c)| Account::new(format!("IMAGE{i}"), Arc::clone(c) as Arc<dyn DocumentClient>))
            .collect();
        ImageStorage::new(AccountPool::new(accounts).unwrap(), "/content/images")
    }

    fn temp_image(name: &str, data: &[u8]) -> (tempfile::NamedTempFile, Image) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        let image = Image {
            path: file.path().to_path_buf(),
            name: name.to_string(),
            content_type: "image/png".to_string(),
        };
        (file, image)
    }

    #[test]
    fn test_join() {
        assert_eq!(join("a", "1.png"), "a/1.png");
        assert_eq!(join("a/", "1.png"), "a/1.png");
        assert_eq!(join("/a", "1.png"), "/a/1.png");
        assert_eq!(join("", "1.png"), "1.png");
        assert_eq!(join("a", "/1.png"), "a/1.png");
    }

    #[test]
    fn test_strip_trailing_separator_once() {
        assert_eq!(strip_trailing_separator("/a/b/"), "/a/b");
        assert_eq!(strip_trailing_separator("/a/b\\"), "/a/b");
        assert_eq!(strip_trailing_separator("/a/b//"), "/a/b/");
        assert_eq!(strip_trailing_separator("/a/b"), "/a/b");
    }

    #[test]
    fn test_target_dir_is_year_and_month() {
        let dir = default_target_dir();
        let (year, month) = dir.split_once('/').unwrap();
        assert_eq!(year.len(), 4);
        assert_eq!(month.len(), 2);
        assert!(year.parse::<u32>().is_ok());
        assert!((1..=12).contains(&month.parse::<u32>().unwrap()));
    }

    #[tokio::test]
    async fn test_save_returns_public_path() {
        let clients = memory_clients(1);
        let storage = storage_over(&clients);
        let (_file, image) = temp_image("1.png", b"png-bytes");

        let url = storage.save(&image, Some("a")).await.unwrap();
        assert_eq!(url, "/content/images/a/1.png");
    }

    #[tokio::test]
    async fn test_save_then_read_roundtrip() {
        let clients = memory_clients(2);
        let storage = storage_over(&clients);
        let data: Vec<u8> = (0..=255).rev().collect();
        let (_file, image) = temp_image("photo.png", &data);

        storage.save(&image, Some("2024/05")).await.unwrap();
        let read = storage.read("/2024/05/photo.png").await.unwrap();
        assert_eq!(read.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_read_ignores_one_trailing_separator() {
        let clients = memory_clients(1);
        let storage = storage_over(&clients);
        let (_file, image) = temp_image("b", b"abc");
        storage.save(&image, Some("a")).await.unwrap();

        let with_slash = storage.read("/a/b/").await.unwrap();
        let without = storage.read("/a/b").await.unwrap();
        let backslash = storage.read("a/b\\").await.unwrap();
        assert_eq!(with_slash, without);
        assert_eq!(backslash, without);
    }

    #[tokio::test]
    async fn test_read_missing_propagates_not_found() {
        let clients = memory_clients(2);
        let storage = storage_over(&clients);
        let err = storage.read("/nope.png").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("/nope.png"));
    }

    #[tokio::test]
    async fn test_saves_are_spread_round_robin() {
        let clients = memory_clients(3);
        let storage = storage_over(&clients);

        for i in 0..4 {
            let (_file, image) = temp_image(&format!("{i}.png"), b"x");
            storage.save(&image, Some("rr")).await.unwrap();
        }

        assert_eq!(clients[0].len("IMAGE0").await, 2);
        assert_eq!(clients[1].len("IMAGE1").await, 1);
        assert_eq!(clients[2].len("IMAGE2").await, 1);
    }

    #[tokio::test]
    async fn test_missing_path_exists_false_delete_true() {
        let clients = memory_clients(2);
        let storage = storage_over(&clients);
        assert!(!storage.exists("ghost.png", "a").await);
        assert!(storage.delete("ghost.png", Some("a")).await);
    }

    #[tokio::test]
    async fn test_delete_removes_document_from_owner() {
        let clients = memory_clients(2);
        let storage = storage_over(&clients);

        // First save goes to account 0, second to account 1.
        let (_f1, first) = temp_image("1.png", b"one");
        let (_f2, second) = temp_image("2.png", b"two");
        storage.save(&first, Some("a")).await.unwrap();
        storage.save(&second, Some("a")).await.unwrap();
        assert!(storage.exists("2.png", "a").await);

        assert!(storage.delete("2.png", Some("a")).await);
        assert!(!storage.exists("2.png", "a").await);
        assert!(clients[1].is_empty("IMAGE1").await);
        assert!(storage.exists("1.png", "a").await);
    }

    #[tokio::test]
    async fn test_store_outage_is_swallowed_by_exists_and_delete() {
        let clients = memory_clients(1);
        let storage = storage_over(&clients);
        let (_file, image) = temp_image("1.png", b"one");
        storage.save(&image, Some("a")).await.unwrap();

        clients[0].set_unavailable(true);
        assert!(!storage.exists("1.png", "a").await);
        assert!(!storage.delete("1.png", Some("a")).await);
    }

    #[tokio::test]
    async fn test_save_propagates_missing_source_file() {
        let clients = memory_clients(1);
        let storage = storage_over(&clients);
        let image = Image {
            path: PathBuf::from("/nonexistent/upload.tmp"),
            name: "x.png".to_string(),
            content_type: "image/png".to_string(),
        };
        let err = storage.save(&image, Some("a")).await.unwrap_err();
        assert_eq!(err.name(), "IoError");
        assert!(clients[0].is_empty("IMAGE0").await);
    }

    #[tokio::test]
    async fn test_save_propagates_store_failure() {
        let clients = memory_clients(1);
        let storage = storage_over(&clients);
        let (_file, image) = temp_image("1.png", b"one");
        clients[0].set_unavailable(true);
        let err = storage.save(&image, Some("a")).await.unwrap_err();
        assert_eq!(err.name(), "StoreCommunicationError");
    }

    #[tokio::test]
    async fn test_save_picks_unique_name_on_collision() {
        let clients = memory_clients(2);
        let storage = storage_over(&clients);
        let (_f1, first) = temp_image("cat.png", b"one");
        let (_f2, second) = temp_image("cat.png", b"two");

        let a = storage.save(&first, Some("pets")).await.unwrap();
        let b = storage.save(&second, Some("pets")).await.unwrap();
        assert_eq!(a, "/content/images/pets/cat.png");
        assert_eq!(b, "/content/images/pets/cat-1.png");
        assert_eq!(storage.read("pets/cat-1.png").await.unwrap().as_ref(), b"two");
    }

    #[tokio::test]
    async fn test_fetch_reports_type_and_timestamp() {
        let clients = memory_clients(1);
        let storage = storage_over(&clients);
        let (_file, image) = temp_image("1.png", b"png");
        storage.save(&image, Some("a")).await.unwrap();

        let served = storage.fetch("/a/1.png").await.unwrap();
        assert_eq!(served.content_type, "image/png");
        assert_eq!(served.data.as_ref(), b"png");
        assert!(served.last_modified.is_some());
    }

    #[test]
    fn test_public_url() {
        let storage = storage_over(&memory_clients(1));
        assert_eq!(storage.public_url("a/1.png"), "/content/images/a/1.png");
        assert_eq!(storage.public_url("/a/1.png"), "/content/images/a/1.png");
    }

    #[test]
    fn test_url_prefix_gets_leading_slash() {
        let pool = AccountPool::new(vec![Account::new(
            "IMAGE",
            Arc::new(MemoryDocumentClient::new("memory://prefix")),
        )])
        .unwrap();
        let storage = ImageStorage::new(pool, "content/images/");
        assert_eq!(storage.url_prefix(), "/content/images");
        assert_eq!(storage.public_url("a/1.png"), "/content/images/a/1.png");

        let pool = AccountPool::new(vec![Account::new(
            "IMAGE",
            Arc::new(MemoryDocumentClient::new("memory://root")),
        )])
        .unwrap();
        let storage = ImageStorage::new(pool, "/");
        assert_eq!(storage.url_prefix(), "");
        assert_eq!(storage.public_url("a/1.png"), "/a/1.png");
    }

    #[tokio::test]
    async fn test_delete_targets_sibling_schema_owner() {
        let image = Arc::new(MemoryDocumentClient::new("https://h.example.com/ords/image"));
        let image2 = Arc::new(MemoryDocumentClient::new("https://h.example.com/ords/image2"));
        image2
            .insert("IMAGE", &codec::encode("a/1.png", b"one", "image/png").unwrap())
            .await
            .unwrap();
        let pool = AccountPool::new(vec![
            Account::new("IMAGE", Arc::clone(&image) as Arc<dyn DocumentClient>),
            Account::new("IMAGE", Arc::clone(&image2) as Arc<dyn DocumentClient>),
        ])
        .unwrap();
        let storage = ImageStorage::new(pool, "/content/images");

        assert!(storage.delete("1.png", Some("a")).await);
        assert!(!storage.exists("1.png", "a").await);
        assert!(image2.is_empty("IMAGE").await);
    }

    /// Configured without a port while its self links carry `:443`.
    struct ExplicitPortLinks {
        inner: MemoryDocumentClient,
    }

    impl DocumentClient for ExplicitPortLinks {
        fn endpoint(&self) -> &str {
            "https://h.example.com/ords/image"
        }

        fn query(
            &self,
            alias: &str,
            spec: &crate::query::QuerySpec,
            filter: &crate::query::PathFilter,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = anyhow::Result<crate::client::QueryResult>> + Send + '_>,
        > {
            self.inner.query(alias, spec, filter)
        }

        fn insert(
            &self,
            alias: &str,
            document: &crate::client::Document,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<String>> + Send + '_>>
        {
            self.inner.insert(alias, document)
        }

        fn delete(
            &self,
            alias: &str,
            id: &str,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + '_>> {
            self.inner.delete(alias, id)
        }
    }

    #[tokio::test]
    async fn test_delete_resolves_owner_with_explicit_default_port() {
        let client = Arc::new(ExplicitPortLinks {
            inner: MemoryDocumentClient::new("https://h.example.com:443/ords/image"),
        });
        let pool = AccountPool::new(vec![Account::new(
            "IMAGE",
            Arc::clone(&client) as Arc<dyn DocumentClient>,
        )])
        .unwrap();
        let storage = ImageStorage::new(pool, "/content/images");
        let (_file, image) = temp_image("1.png", b"one");
        storage.save(&image, Some("a")).await.unwrap();

        assert!(storage.delete("1.png", Some("a")).await);
        assert!(client.inner.is_empty("IMAGE").await);
    }
}
