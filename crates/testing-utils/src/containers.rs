//! 集成测试用Redis容器

use anyhow::Result;
use cimm_core::config::RedisEndpointConfig;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::redis::Redis;

pub struct RedisTestContainer {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    pub port: u16,
}

impl RedisTestContainer {
    pub async fn new() -> Result<Self> {
        let container = Redis::default().start().await?;
        let port = container.get_host_port_ipv4(6379).await?;
        Ok(Self { container, port })
    }

    pub fn endpoint_config(&self) -> RedisEndpointConfig {
        RedisEndpointConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            ..Default::default()
        }
    }
}
