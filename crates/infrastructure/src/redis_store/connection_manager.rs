use std::time::Duration;

use cimm_core::config::RedisEndpointConfig;
use cimm_core::{CimmError, CimmResult};
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

/// 主存储连接管理
///
/// 内部使用 `redis::aio::ConnectionManager`，断线后自动重连；
/// 首次连接按配置重试。
#[derive(Clone)]
pub struct RedisConnectionManager {
    manager: ConnectionManager,
    config: RedisEndpointConfig,
}

impl RedisConnectionManager {
    pub async fn new(config: RedisEndpointConfig) -> CimmResult<Self> {
        let client = Client::open(config.build_connection_url())
            .map_err(|e| CimmError::StateStore(format!("创建Redis客户端失败: {e}")))?;

        let manager = Self::connect_with_retry(&client, &config).await?;
        let manager = Self { manager, config };
        manager.ping().await?;
        debug!(
            "成功连接到Redis {}:{}",
            manager.config.host, manager.config.port
        );

        Ok(manager)
    }

    async fn connect_with_retry(
        client: &Client,
        config: &RedisEndpointConfig,
    ) -> CimmResult<ConnectionManager> {
        let attempts = config.max_retry_attempts.max(1);
        let connect_timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut last_error = String::from("Unknown");

        for attempt in 0..attempts {
            match timeout(connect_timeout, ConnectionManager::new(client.clone())).await {
                Ok(Ok(manager)) => {
                    if attempt > 0 {
                        debug!("第 {} 次尝试后重新连接到Redis", attempt + 1);
                    }
                    return Ok(manager);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("连接超时 ({}s)", config.connection_timeout_seconds),
            }

            if attempt + 1 < attempts {
                warn!(
                    "连接Redis失败 (第 {}/{} 次): {}，{}s后重试",
                    attempt + 1,
                    attempts,
                    last_error,
                    config.retry_delay_seconds
                );
                sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
        }

        let error_msg = format!(
            "连接Redis失败，已重试 {} 次，最后错误: {}",
            attempts, last_error
        );
        error!("{}", error_msg);
        Err(CimmError::StateStore(error_msg))
    }

    /// 多路复用连接的句柄，克隆开销很小
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub fn config(&self) -> &RedisEndpointConfig {
        &self.config
    }

    pub async fn ping(&self) -> CimmResult<()> {
        let mut conn = self.connection();
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(CimmError::StateStore(format!(
                "PING返回了意外的响应: {response}"
            )))
        }
    }
}
