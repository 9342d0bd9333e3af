use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::CimmResult;

/// 共享状态存储抽象接口
///
/// 带过期时间的键值存储加发布/订阅通道。任务和分块都以JSON形式
/// 存放在与其ID相同的键下，每次写入都会刷新TTL。
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 读取键值，键不存在或已过期时返回 None
    async fn get(&self, key: &str) -> CimmResult<Option<Vec<u8>>>;

    /// 写入键值并设置过期时间
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> CimmResult<()>;

    /// 删除键，返回键是否存在
    async fn delete(&self, key: &str) -> CimmResult<bool>;

    /// 刷新已有键的过期时间，键不存在时返回 false
    async fn expire(&self, key: &str, ttl: Duration) -> CimmResult<bool>;

    /// 仅当键不存在时写入令牌 (SET NX PX)
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> CimmResult<bool>;

    /// 令牌匹配时删除键
    async fn unlock(&self, key: &str, token: &str) -> CimmResult<bool>;

    /// 向通道发布消息
    async fn publish(&self, channel: &str, payload: &[u8]) -> CimmResult<()>;

    /// 连通性检查
    async fn ping(&self) -> CimmResult<()>;
}

/// JSON读写辅助
#[async_trait]
pub trait StateStoreExt: StateStore {
    async fn get_json<T>(&self, key: &str) -> CimmResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T, ttl: Duration) -> CimmResult<()>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_vec(value)?;
        self.set_ex(key, &raw, ttl).await
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}
