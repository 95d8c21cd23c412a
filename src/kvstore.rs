//! L2 cache backend contract. Generalizes the teacher's direct `redis::Client`
//! usage (`memory.rs`, `virustotal.rs`'s Postgres cache table) into a small
//! trait so `ResponseCache` doesn't hard-depend on Redis being reachable.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::error::Error;

#[async_trait]
pub trait KVStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Box<dyn Error + Send + Sync>>;
    async fn delete_prefixed(&self, prefix: &str) -> Result<(), Box<dyn Error + Send + Sync>>;
}

pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KVStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete_prefixed(&self, prefix: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = conn.keys(pattern).await?;
        if !keys.is_empty() {
            let _: () = conn.del(keys).await?;
        }
        Ok(())
    }
}
