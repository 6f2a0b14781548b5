use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Revocation set for refresh tokens plus a small expiring key/value cache.
///
/// Blacklisting is idempotent: revoking an already revoked token succeeds.
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn blacklist_token(&self, token_jti: &str, expiry_seconds: i64)
        -> Result<(), anyhow::Error>;
    async fn is_blacklisted(&self, token_jti: &str) -> Result<bool, anyhow::Error>;
    /// Revokes a token only if it is not revoked yet. Returns `false` when
    /// another caller got there first.
    async fn revoke_if_new(&self, token_jti: &str, expiry_seconds: i64)
        -> Result<bool, anyhow::Error>;
    async fn set_cache(&self, key: &str, value: &str, expiry_seconds: i64)
        -> Result<(), anyhow::Error>;
    /// Reads and deletes in one step, so a value can be taken only once.
    async fn take_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

fn blacklist_key(token_jti: &str) -> String {
    format!("blacklist:{}", token_jti)
}

#[derive(Clone)]
pub struct RedisService {
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl TokenBlacklist for RedisService {
    async fn blacklist_token(
        &self,
        token_jti: &str,
        expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(blacklist_key(token_jti))
            .arg("revoked")
            .arg("EX")
            .arg(expiry_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to blacklist token: {}", e))
    }

    async fn is_blacklisted(&self, token_jti: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("EXISTS")
            .arg(blacklist_key(token_jti))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check blacklist: {}", e))
    }

    async fn revoke_if_new(
        &self,
        token_jti: &str,
        expiry_seconds: i64,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(blacklist_key(token_jti))
            .arg("revoked")
            .arg("NX")
            .arg("EX")
            .arg(expiry_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to revoke token: {}", e))?;
        Ok(reply.is_some())
    }

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(expiry_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn take_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to take cache entry: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process stand-in used by tests; expiry is not modelled.
#[derive(Default)]
pub struct MockBlacklist {
    pub blacklisted_tokens: Mutex<HashSet<String>>,
    pub cache: Mutex<HashMap<String, String>>,
}

impl MockBlacklist {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenBlacklist for MockBlacklist {
    async fn blacklist_token(
        &self,
        token_jti: &str,
        _expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        self.blacklisted_tokens
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock blacklist mutex poisoned: {}", e))?
            .insert(token_jti.to_string());
        Ok(())
    }

    async fn is_blacklisted(&self, token_jti: &str) -> Result<bool, anyhow::Error> {
        Ok(self
            .blacklisted_tokens
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock blacklist mutex poisoned: {}", e))?
            .contains(token_jti))
    }

    async fn revoke_if_new(
        &self,
        token_jti: &str,
        _expiry_seconds: i64,
    ) -> Result<bool, anyhow::Error> {
        Ok(self
            .blacklisted_tokens
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock blacklist mutex poisoned: {}", e))?
            .insert(token_jti.to_string()))
    }

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        _expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        self.cache
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn take_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self
            .cache
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .remove(key))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blacklisting_twice_is_fine() {
        let blacklist = MockBlacklist::new();
        blacklist.blacklist_token("jti-1", 60).await.unwrap();
        blacklist.blacklist_token("jti-1", 60).await.unwrap();
        assert!(blacklist.is_blacklisted("jti-1").await.unwrap());
        assert!(!blacklist.is_blacklisted("jti-2").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_if_new_wins_only_once() {
        let blacklist = MockBlacklist::new();
        assert!(blacklist.revoke_if_new("jti-1", 60).await.unwrap());
        assert!(!blacklist.revoke_if_new("jti-1", 60).await.unwrap());
        assert!(blacklist.is_blacklisted("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn cached_values_are_taken_once() {
        let cache = MockBlacklist::new();
        cache.set_cache("oauth_state:abc", "1", 300).await.unwrap();
        assert_eq!(cache.take_cache("oauth_state:abc").await.unwrap().as_deref(), Some("1"));
        assert_eq!(cache.take_cache("oauth_state:abc").await.unwrap(), None);
    }
}
