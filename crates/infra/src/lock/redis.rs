//! Cluster-wide lock on a single Redis key.
//!
//! Acquire is `SET key owner NX PX lease`; release deletes the key only while it still
//! holds this owner's token, so a node whose lease ran out cannot free a successor's lock.

use std::sync::Arc;
use std::time::Duration;

use ::redis::{Connection, Script};
use tracing::debug;
use uuid::Uuid;

use super::{LockError, LockingStrategy};

pub const DEFAULT_LOCK_KEY: &str = "ticketeer:locks:registry-cleaner";

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone)]
pub struct RedisLockingStrategy {
    client: Arc<::redis::Client>,
    key: String,
    owner: String,
    lease: Duration,
    timeout: Duration,
}

fn unavailable(err: ::redis::RedisError) -> LockError {
    LockError::Unavailable(err.to_string())
}

impl RedisLockingStrategy {
    pub fn new(redis_url: impl AsRef<str>, lease: Duration, timeout: Duration) -> Result<Self, LockError> {
        let client = ::redis::Client::open(redis_url.as_ref()).map_err(unavailable)?;
        Ok(Self {
            client: Arc::new(client),
            key: DEFAULT_LOCK_KEY.to_string(),
            owner: Uuid::now_v7().to_string(),
            lease,
            timeout,
        })
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    fn connection(&self) -> Result<Connection, LockError> {
        let conn = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(unavailable)?;
        conn.set_read_timeout(Some(self.timeout)).map_err(unavailable)?;
        conn.set_write_timeout(Some(self.timeout)).map_err(unavailable)?;
        Ok(conn)
    }
}

impl LockingStrategy for RedisLockingStrategy {
    fn acquire(&self) -> Result<bool, LockError> {
        let mut conn = self.connection()?;
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.owner)
            .arg("NX")
            .arg("PX")
            .arg(self.lease.as_millis() as u64)
            .query(&mut conn)
            .map_err(unavailable)?;
        let acquired = reply.is_some();
        debug!(key = %self.key, acquired, "redis lock attempt");
        Ok(acquired)
    }

    fn release(&self) -> Result<(), LockError> {
        let mut conn = self.connection()?;
        let removed: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.owner)
            .invoke(&mut conn)
            .map_err(unavailable)?;
        debug!(key = %self.key, released = removed > 0, "redis lock release");
        Ok(())
    }
}
