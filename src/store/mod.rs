// src/store/mod.rs
//
// Explicitly owned handles to the datastore and cache. `main` opens them
// at startup, shares them with the health evaluator, and closes them on
// shutdown.
mod cache;
mod database;

pub use cache::CacheClient;
pub use database::Database;

use crate::health::ProbeError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid database url: {0}")]
    InvalidDatabaseUrl(#[source] sqlx::Error),

    #[error("invalid cache url: {0}")]
    InvalidCacheUrl(String),

    #[error("cache connection failed: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}
