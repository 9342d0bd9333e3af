use std::time::Duration;

use async_trait::async_trait;
use cimm_core::traits::StateStore;
use cimm_core::CimmResult;
use redis::Script;

use super::connection_manager::RedisConnectionManager;

const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// 主存储: 任务记录、分块记录、租约和就绪推送
pub struct RedisStateStore {
    connection: RedisConnectionManager,
    unlock_script: Script,
}

impl RedisStateStore {
    pub fn new(connection: RedisConnectionManager) -> Self {
        Self {
            connection,
            unlock_script: Script::new(UNLOCK_SCRIPT),
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> CimmResult<Option<Vec<u8>>> {
        let mut conn = self.connection.connection();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> CimmResult<()> {
        let mut conn = self.connection.connection();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CimmResult<bool> {
        let mut conn = self.connection.connection();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CimmResult<bool> {
        let mut conn = self.connection.connection();
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> CimmResult<bool> {
        let mut conn = self.connection.connection();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> CimmResult<bool> {
        let mut conn = self.connection.connection();
        let removed: i64 = self
            .unlock_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> CimmResult<()> {
        let mut conn = self.connection.connection();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> CimmResult<()> {
        self.connection.ping().await
    }
}
