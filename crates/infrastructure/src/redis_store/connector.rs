use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cimm_core::models::{Destination, EndpointKey};
use cimm_core::traits::{CompletionChannel, DestinationConnector, JobQueue};
use cimm_core::{CimmError, CimmResult};
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::completion_channel::RedisCompletionChannel;
use super::job_queue::RedisJobQueue;

/// 按端点缓存连接的目标节点连接器
///
/// 多个目标节点可能共用一个Redis实例，同一端点只建立一个多路复用连接。
/// 探活失败或调用方报告连接错误时丢弃缓存，下次重新连接。
pub struct RedisDestinationConnector {
    connections: RwLock<HashMap<EndpointKey, MultiplexedConnection>>,
    connect_timeout: Duration,
}

impl RedisDestinationConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connect_timeout,
        }
    }

    fn client(endpoint: &EndpointKey) -> CimmResult<Client> {
        Client::open(endpoint.connection_url())
            .map_err(|e| CimmError::StateStore(format!("端点 {endpoint} 地址无效: {e}")))
    }

    async fn connection(&self, endpoint: &EndpointKey) -> CimmResult<MultiplexedConnection> {
        if let Some(conn) = self.connections.read().await.get(endpoint) {
            return Ok(conn.clone());
        }

        let client = Self::client(endpoint)?;
        let conn = timeout(self.connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CimmError::StateStore(format!("连接端点 {endpoint} 超时")))??;
        debug!("已连接端点 {}", endpoint);

        self.connections
            .write()
            .await
            .insert(endpoint.clone(), conn.clone());
        Ok(conn)
    }

    async fn evict(&self, endpoint: &EndpointKey) {
        self.connections.write().await.remove(endpoint);
    }

    async fn probe(&self, endpoint: &EndpointKey) -> CimmResult<MultiplexedConnection> {
        let mut conn = self.connection(endpoint).await?;
        let ping = timeout(
            self.connect_timeout,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await;
        match ping {
            Ok(Ok(_)) => Ok(conn),
            Ok(Err(e)) => {
                self.evict(endpoint).await;
                Err(e.into())
            }
            Err(_) => {
                self.evict(endpoint).await;
                Err(CimmError::StateStore(format!("端点 {endpoint} 探活超时")))
            }
        }
    }
}

#[async_trait]
impl DestinationConnector for RedisDestinationConnector {
    async fn connect(&self, destination: &Destination) -> CimmResult<Arc<dyn JobQueue>> {
        let endpoint = destination.endpoint();
        let conn = self.probe(&endpoint).await.inspect_err(|e| {
            warn!("目标节点 {} ({}) 不可达: {}", destination.id, endpoint, e);
        })?;
        Ok(Arc::new(RedisJobQueue::new(destination.queue_name.clone(), conn)))
    }

    async fn queue(
        &self,
        endpoint: &EndpointKey,
        queue_name: &str,
    ) -> CimmResult<Arc<dyn JobQueue>> {
        let conn = self.connection(endpoint).await?;
        Ok(Arc::new(RedisJobQueue::new(queue_name, conn)))
    }

    async fn invalidate(&self, endpoint: &EndpointKey) {
        if self.connections.write().await.remove(endpoint).is_some() {
            debug!("已丢弃端点 {} 的缓存连接", endpoint);
        }
    }

    async fn subscribe(
        &self,
        endpoint: &EndpointKey,
        channel: &str,
    ) -> CimmResult<Box<dyn CompletionChannel>> {
        let client = Self::client(endpoint)?;
        let subscription = timeout(
            self.connect_timeout,
            RedisCompletionChannel::subscribe(&client, endpoint.clone(), channel),
        )
        .await
        .map_err(|_| CimmError::StateStore(format!("订阅端点 {endpoint} 超时")))??;
        Ok(Box::new(subscription))
    }
}
