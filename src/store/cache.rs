// src/store/cache.rs
use super::StoreError;
use crate::config::CacheConfig;
use crate::health::{CacheProbe, ProbeError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use url::Url;

const DEFAULT_REDIS_PORT: u16 = 6379;

/// Handle to the Redis cache. Absence of a handle means the application
/// runs without caching. Clones share one connection.
#[derive(Clone)]
pub struct CacheClient {
    manager: Arc<ConnectionManager>,
    ping_timeout: Duration,
    endpoint: String,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("endpoint", &self.endpoint)
            .field("ping_timeout", &self.ping_timeout)
            .finish()
    }
}

impl CacheClient {
    /// Connect and verify with a `PING`. Returns `None` when caching is
    /// disabled or the cache cannot be reached.
    pub async fn open(config: &CacheConfig) -> Option<Self> {
        if !config.enabled {
            info!("Cache disabled by configuration");
            return None;
        }

        match Self::connect(config).await {
            Ok(client) => {
                info!(endpoint = %client.endpoint, "Redis cache available");
                Some(client)
            }
            Err(e) => {
                warn!(error = %e, "Redis connection failed, application will run without caching");
                None
            }
        }
    }

    async fn connect(config: &CacheConfig) -> Result<Self, StoreError> {
        let url = connection_url(config)?;
        let endpoint = redacted_endpoint(&url);
        info!(%endpoint, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let manager = timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(config.connect_timeout()))??;

        let client = Self {
            manager: Arc::new(manager),
            ping_timeout: config.ping_timeout(),
            endpoint,
        };
        client.ping().await?;

        Ok(client)
    }

    /// Release this handle. The connection is torn down only once every
    /// clone has been released.
    pub fn close(self) {
        if release_last(self.manager) {
            info!(endpoint = %self.endpoint, "Redis connection closed");
        } else {
            info!(
                endpoint = %self.endpoint,
                "Redis handle released, connection stays open for remaining clones"
            );
        }
    }
}

#[async_trait]
impl CacheProbe for CacheClient {
    async fn ping(&self) -> Result<(), ProbeError> {
        let mut conn = ConnectionManager::clone(&self.manager);
        let reply = timeout(
            self.ping_timeout,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| ProbeError::Timeout(self.ping_timeout))?
        .map_err(|e| ProbeError::Unreachable(e.to_string()))?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(ProbeError::Unreachable(format!("unexpected PING reply: {reply}")))
        }
    }
}

/// `cache.url` when set, otherwise assembled from host, port, db and password.
fn connection_url(config: &CacheConfig) -> Result<Url, StoreError> {
    if let Some(raw) = config.url.as_deref().filter(|u| !u.is_empty()) {
        return Url::parse(raw).map_err(|e| StoreError::InvalidCacheUrl(e.to_string()));
    }

    let mut url = Url::parse(&format!(
        "redis://{}:{}/{}",
        config.host, config.port, config.db
    ))
    .map_err(|e| StoreError::InvalidCacheUrl(e.to_string()))?;

    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        url.set_password(Some(password))
            .map_err(|_| StoreError::InvalidCacheUrl("cannot set password".to_string()))?;
    }

    Ok(url)
}

/// Drop `handle`, returning whether it was the last reference.
fn release_last<T>(handle: Arc<T>) -> bool {
    Arc::into_inner(handle).is_some()
}

fn redacted_endpoint(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown");
    let port = url.port().unwrap_or(DEFAULT_REDIS_PORT);
    let db = url.path().trim_start_matches('/');
    let db = if db.is_empty() { "0" } else { db };
    format!("{host}:{port}/{db}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CacheConfig {
        CacheConfig {
            connect_timeout_secs: 1,
            ping_timeout_secs: 1,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_url_from_parts() {
        let mut cfg = config();
        cfg.host = "cache.internal".to_string();
        cfg.port = 6380;
        cfg.db = 2;
        cfg.password = Some("s3cret".to_string());

        let url = connection_url(&cfg).unwrap();
        assert_eq!(url.as_str(), "redis://:s3cret@cache.internal:6380/2");
        assert_eq!(redacted_endpoint(&url), "cache.internal:6380/2");
    }

    #[test]
    fn test_explicit_url_wins() {
        let mut cfg = config();
        cfg.url = Some("redis://user:pw@managed.example.com/5".to_string());
        cfg.host = "ignored".to_string();

        let url = connection_url(&cfg).unwrap();
        assert_eq!(url.host_str(), Some("managed.example.com"));
        assert_eq!(redacted_endpoint(&url), "managed.example.com:6379/5");
    }

    #[test]
    fn test_invalid_url() {
        let mut cfg = config();
        cfg.url = Some("::not a url::".to_string());
        assert!(matches!(
            connection_url(&cfg),
            Err(StoreError::InvalidCacheUrl(_))
        ));
    }

    #[test]
    fn test_release_reports_last_handle() {
        let handle = Arc::new("conn".to_string());
        let other = Arc::clone(&handle);

        assert!(!release_last(handle));
        assert!(release_last(other));
    }

    #[tokio::test]
    async fn test_disabled_cache_is_absent() {
        let mut cfg = config();
        cfg.enabled = false;
        assert!(CacheClient::open(&cfg).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_cache_is_absent() {
        let mut cfg = config();
        cfg.host = "127.0.0.1".to_string();
        cfg.port = 1;
        assert!(CacheClient::open(&cfg).await.is_none());
    }
}
