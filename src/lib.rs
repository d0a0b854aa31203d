//! sodastore library -- image storage on SODA JSON document collections.
//!
//! Images are stored as JSON documents spread across a pool of document
//! store accounts.  The crate provides the account pool, the lookup-by-path
//! fan-out, the blob codec, the storage core implementing the host's
//! save/read/exists/delete contract, and an axum router serving the images.

pub mod client;
pub mod codec;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod pool;
pub mod query;
pub mod server;
pub mod storage;

use crate::config::Config;
use crate::storage::ImageStorage;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Service configuration.
    pub config: Config,
    /// Storage core over the configured account pool.
    pub storage: ImageStorage,
}
