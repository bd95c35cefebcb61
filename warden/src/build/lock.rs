//! Build records keyed by `gitURL-hash`, used to deduplicate image builds
//!
//! A record holds a short status text and always carries an expiry. While a
//! record exists no new build for that key is started.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::errors::WardenError;

#[async_trait]
pub trait BuildLock: Send + Sync {
    /// Current record for `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>, WardenError>;

    /// Store `value` only when `key` has no record. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, WardenError>;

    /// Store `value`, replacing any existing record
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), WardenError>;

    async fn del(&self, key: &str) -> Result<(), WardenError>;
}

/// Process-local build records
#[derive(Debug, Default)]
pub struct MemoryBuildLock {
    records: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryBuildLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn live<'a>(
        records: &'a mut HashMap<String, (String, Instant)>,
        key: &str,
    ) -> Option<&'a String> {
        let expired = matches!(records.get(key), Some((_, expires)) if *expires <= Instant::now());
        if expired {
            records.remove(key);
        }
        records.get(key).map(|(value, _)| value)
    }

    /// Drop every expired record; keys nobody asks about again would
    /// otherwise stay forever
    fn sweep(records: &mut HashMap<String, (String, Instant)>) {
        let now = Instant::now();
        records.retain(|_, (_, expires)| *expires > now);
    }
}

#[async_trait]
impl BuildLock for MemoryBuildLock {
    async fn get(&self, key: &str) -> Result<Option<String>, WardenError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Self::live(&mut records, key).cloned())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, WardenError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Self::sweep(&mut records);
        if Self::live(&mut records, key).is_some() {
            return Ok(false);
        }
        records.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), WardenError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Self::sweep(&mut records);
        records.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), WardenError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(key);
        Ok(())
    }
}

/// Build records shared through Redis
#[derive(Clone)]
pub struct RedisBuildLock {
    conn: ConnectionManager,
}

impl RedisBuildLock {
    pub async fn connect(url: &str) -> Result<Self, WardenError> {
        let client = redis::Client::open(url)
            .map_err(|e| WardenError::BuildLockError(format!("invalid redis url: {}", e)))?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            WardenError::BuildLockError(format!("failed to connect to redis: {}", e))
        })?;
        info!("Connected to build lock store");
        Ok(Self { conn })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl BuildLock for RedisBuildLock {
    async fn get(&self, key: &str) -> Result<Option<String>, WardenError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, WardenError> {
        let mut conn = self.conn.clone();
        let stored: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(stored.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), WardenError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), WardenError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
