//! Regeneration cooldown: one expensive recomputation per (purpose, symbol)
//! per TTL window. Overlapping requests are rejected, never queued.

use analysis_core::{AnalysisError, CooldownStore};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Process-local store. Expired keys are treated as absent and overwritten lazily.
#[derive(Default)]
pub struct InMemoryCooldownStore {
    expiries: DashMap<String, Instant>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_expiry(&self, key: &str) -> Option<Instant> {
        let now = Instant::now();
        self.expiries.get(key).map(|e| *e.value()).filter(|at| *at > now)
    }
}

#[async_trait]
impl CooldownStore for InMemoryCooldownStore {
    async fn exists(&self, key: &str) -> Result<bool, AnalysisError> {
        Ok(self.live_expiry(key).is_some())
    }

    async fn put(&self, key: &str, ttl: Duration) -> Result<(), AnalysisError> {
        self.expiries.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), AnalysisError> {
        self.expiries.remove(key);
        Ok(())
    }

    async fn try_put(&self, key: &str, ttl: Duration) -> Result<bool, AnalysisError> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so check-and-set is atomic
        match self.expiries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return Ok(false);
                }
                entry.insert(now + ttl);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn remaining(&self, key: &str) -> Result<Option<Duration>, AnalysisError> {
        Ok(self
            .live_expiry(key)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }
}

/// Shared store for several worker processes.
#[derive(Clone)]
pub struct RedisCooldownStore {
    conn: ConnectionManager,
}

fn cache_err(e: redis::RedisError) -> AnalysisError {
    AnalysisError::CacheError(e.to_string())
}

/// Redis expiries are whole seconds.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl RedisCooldownStore {
    pub async fn connect(url: &str) -> Result<Self, AnalysisError> {
        let client = redis::Client::open(url).map_err(cache_err)?;
        let conn = ConnectionManager::new(client).await.map_err(cache_err)?;
        tracing::info!("Cooldown store connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CooldownStore for RedisCooldownStore {
    async fn exists(&self, key: &str) -> Result<bool, AnalysisError> {
        let mut conn = self.conn.clone();
        let found: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(found)
    }

    async fn put(&self, key: &str, ttl: Duration) -> Result<(), AnalysisError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), AnalysisError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn try_put(&self, key: &str, ttl: Duration) -> Result<bool, AnalysisError> {
        let mut conn = self.conn.clone();
        // Nil reply when NX refuses
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(reply.is_some())
    }

    async fn remaining(&self, key: &str) -> Result<Option<Duration>, AnalysisError> {
        let mut conn = self.conn.clone();
        // -2 when absent, -1 when the key has no expiry
        let secs: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(match secs {
            -2 => None,
            s if s < 0 => Some(Duration::ZERO),
            s => Some(Duration::from_secs(s as u64)),
        })
    }
}

/// Proof that the caller owns the cooldown key for one computation.
#[must_use = "a permit must be completed or aborted"]
#[derive(Debug)]
pub struct CooldownPermit {
    key: String,
}

impl CooldownPermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

pub struct CooldownController {
    store: Arc<dyn CooldownStore>,
    ttl: Duration,
}

impl CooldownController {
    pub fn new(store: Arc<dyn CooldownStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(purpose: &str, symbol: &str) -> String {
        format!("cooldown:{}:{}", purpose, symbol.trim().to_uppercase())
    }

    /// Claim the key or report how long until it frees up.
    pub async fn try_begin(&self, purpose: &str, symbol: &str) -> Result<CooldownPermit, AnalysisError> {
        let key = Self::key(purpose, symbol);
        if self.store.try_put(&key, self.ttl).await? {
            return Ok(CooldownPermit { key });
        }

        let remaining = self.store.remaining(&key).await?.unwrap_or(Duration::ZERO);
        let retry_after_secs = (remaining.as_secs_f64().ceil() as u64).max(1);
        tracing::debug!(key = %key, retry_after_secs, "Cooldown active");
        Err(AnalysisError::CooldownActive { key, retry_after_secs })
    }

    /// Success: the key stays until its TTL runs out.
    pub fn complete(&self, permit: CooldownPermit) {
        tracing::debug!(key = %permit.key, "Cooldown held until expiry");
    }

    /// Failure: release the key so a retry is not blocked.
    pub async fn abort(&self, permit: CooldownPermit) {
        if let Err(e) = self.store.forget(&permit.key).await {
            tracing::warn!(key = %permit.key, error = %e, "Failed to release cooldown");
        }
    }

    pub async fn is_cooling(&self, purpose: &str, symbol: &str) -> Result<bool, AnalysisError> {
        self.store.exists(&Self::key(purpose, symbol)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(ttl: Duration) -> CooldownController {
        CooldownController::new(Arc::new(InMemoryCooldownStore::new()), ttl)
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            CooldownController::key("prediction:today", " aapl "),
            "cooldown:prediction:today:AAPL"
        );
    }

    #[tokio::test]
    async fn test_second_request_rejected_with_retry_hint() {
        let cooldown = controller(Duration::from_secs(30));
        let permit = cooldown.try_begin("prediction:today", "AAPL").await.unwrap();
        cooldown.complete(permit);

        match cooldown.try_begin("prediction:today", "AAPL").await {
            Err(AnalysisError::CooldownActive { key, retry_after_secs }) => {
                assert_eq!(key, "cooldown:prediction:today:AAPL");
                assert!(retry_after_secs >= 29 && retry_after_secs <= 30);
            }
            other => panic!("expected cooldown rejection, got {:?}", other),
        }

        // other purposes and symbols are independent
        assert!(cooldown.try_begin("prediction:week", "AAPL").await.is_ok());
        assert!(cooldown.try_begin("prediction:today", "MSFT").await.is_ok());
    }

    #[tokio::test]
    async fn test_key_expires_after_ttl() {
        let cooldown = controller(Duration::from_millis(100));
        let permit = cooldown.try_begin("scenarios:today", "TSLA").await.unwrap();
        cooldown.complete(permit);
        assert!(cooldown.try_begin("scenarios:today", "TSLA").await.is_err());
        assert!(cooldown.is_cooling("scenarios:today", "TSLA").await.unwrap());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!cooldown.is_cooling("scenarios:today", "TSLA").await.unwrap());
        assert!(cooldown.try_begin("scenarios:today", "TSLA").await.is_ok());
    }

    #[tokio::test]
    async fn test_abort_releases_key() {
        let cooldown = controller(Duration::from_secs(30));
        let permit = cooldown.try_begin("prediction:today", "NVDA").await.unwrap();
        cooldown.abort(permit).await;
        assert!(cooldown.try_begin("prediction:today", "NVDA").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_claims_admit_one() {
        let store = Arc::new(InMemoryCooldownStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_put("cooldown:x:AAPL", Duration::from_secs(30)).await.unwrap()
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
