use std::time::Duration;
use uuid::Uuid;

const LOCK_KEY: &str = "podcast_video:sweep_lock";

/// Deletes the key only while it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis lock that keeps two sweeps from running at the same time.
pub struct SweepLock {
    client: redis::Client,
    ttl: Duration,
}

/// Proof of holding the lock; pass it back to [`SweepLock::release`].
#[derive(Debug)]
pub struct LockGuard {
    token: String,
}

impl SweepLock {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url).map_err(LockError::Redis)?;
        Ok(Self { client, ttl })
    }

    /// Try to take the lock. `None` means another sweep holds it.
    pub async fn acquire(&self) -> Result<Option<LockGuard>, LockError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let token = Uuid::new_v4().to_string();
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);

        let reply: Option<String> = redis::cmd("SET")
            .arg(LOCK_KEY)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| LockGuard { token }))
    }

    /// Release the lock if it is still ours. Returns false when it had expired.
    pub async fn release(&self, guard: LockGuard) -> Result<bool, LockError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(LOCK_KEY)
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), LockError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
