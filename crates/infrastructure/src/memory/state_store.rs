use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cimm_core::traits::StateStore;
use cimm_core::{CimmError, CimmResult};
use tokio::sync::RwLock;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// 内存状态存储
///
/// 发布的消息按通道记录下来，可通过 [`InMemoryStateStore::published`] 查看。
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: RwLock<HashMap<String, Entry>>,
    published: RwLock<Vec<(String, Vec<u8>)>>,
    offline: AtomicBool,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可达
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 某通道上已发布的消息
    pub async fn published(&self, channel: &str) -> Vec<Vec<u8>> {
        self.published
            .read()
            .await
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// 当前未过期的键
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn check_online(&self) -> CimmResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CimmError::StateStore("内存存储处于离线状态".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> CimmResult<Option<Vec<u8>>> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> CimmResult<()> {
        self.check_online()?;
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CimmResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CimmResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        match self.entries.write().await.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> CimmResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: token.as_bytes().to_vec(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn unlock(&self, key: &str, token: &str) -> CimmResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let owned = entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == token.as_bytes());
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> CimmResult<()> {
        self.check_online()?;
        self.published
            .write()
            .await
            .push((channel.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn ping(&self) -> CimmResult<()> {
        self.check_online()
    }
}
