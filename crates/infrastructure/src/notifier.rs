//! 任务就绪推送
//!
//! 推送是尽力而为的，失败只返回错误由调用方记录日志，不影响任务状态。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cimm_core::config::{NotifierConfig, NotifierKind};
use cimm_core::traits::{StateStore, TaskNotifier};
use cimm_core::{CimmError, CimmResult};
use tracing::debug;

/// HTTP推送，向 `publish_url + owner` POST任务ID
pub struct HttpTaskNotifier {
    client: reqwest::Client,
    publish_url: String,
}

impl HttpTaskNotifier {
    pub fn new(publish_url: impl Into<String>, request_timeout: Duration) -> CimmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CimmError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            publish_url: publish_url.into(),
        })
    }

    pub fn target(&self, owner: i64) -> String {
        format!("{}{}", self.publish_url, owner)
    }
}

#[async_trait]
impl TaskNotifier for HttpTaskNotifier {
    async fn notify_ready(&self, owner: i64, task_id: &str) -> CimmResult<()> {
        let url = self.target(owner);
        let response = self
            .client
            .post(&url)
            .body(task_id.to_string())
            .send()
            .await
            .map_err(|e| CimmError::Notification(format!("POST {url} 失败: {e}")))?;

        if !response.status().is_success() {
            return Err(CimmError::Notification(format!(
                "POST {} 返回状态码 {}",
                url,
                response.status()
            )));
        }
        debug!("已推送任务 {} 就绪通知到 {}", task_id, url);
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// 在主存储的 `channel_prefix + owner` 频道上发布任务ID
pub struct RedisTaskNotifier {
    store: Arc<dyn StateStore>,
    channel_prefix: String,
}

impl RedisTaskNotifier {
    pub fn new(store: Arc<dyn StateStore>, channel_prefix: impl Into<String>) -> Self {
        Self {
            store,
            channel_prefix: channel_prefix.into(),
        }
    }

    pub fn channel(&self, owner: i64) -> String {
        format!("{}{}", self.channel_prefix, owner)
    }
}

#[async_trait]
impl TaskNotifier for RedisTaskNotifier {
    async fn notify_ready(&self, owner: i64, task_id: &str) -> CimmResult<()> {
        self.store
            .publish(&self.channel(owner), task_id.as_bytes())
            .await
            .map_err(|e| CimmError::Notification(e.to_string()))
    }

    fn name(&self) -> &str {
        "redis"
    }
}

/// 不推送，客户端自行轮询
pub struct NoopTaskNotifier;

#[async_trait]
impl TaskNotifier for NoopTaskNotifier {
    async fn notify_ready(&self, _owner: i64, _task_id: &str) -> CimmResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// 按配置构建推送实现
pub fn build_notifier(
    config: &NotifierConfig,
    store: Arc<dyn StateStore>,
) -> CimmResult<Arc<dyn TaskNotifier>> {
    Ok(match config.kind {
        NotifierKind::None => Arc::new(NoopTaskNotifier),
        NotifierKind::Http => {
            let url = config.publish_url.clone().ok_or_else(|| {
                CimmError::Configuration("HTTP推送需要配置publish_url".to_string())
            })?;
            Arc::new(HttpTaskNotifier::new(
                url,
                Duration::from_secs(config.request_timeout_seconds),
            )?)
        }
        NotifierKind::Redis => Arc::new(RedisTaskNotifier::new(
            store,
            config.channel_prefix.clone(),
        )),
    })
}
