use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 引擎参数
///
/// 分块大小、各类TTL、轮询间隔和租约参数。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub chunk_size: usize,
    pub task_ttl_seconds: u64,
    pub job_timeout_seconds: u64,
    pub result_ttl_seconds: u64,
    pub poll_interval_ms: u64,
    pub completion_channel: String,
    pub lease_ttl_ms: u64,
    pub lease_retry_attempts: u32,
    pub lease_retry_delay_ms: u64,
    pub processed_jobs_ttl_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            task_ttl_seconds: 86400,
            job_timeout_seconds: 3600,
            result_ttl_seconds: 86400,
            poll_interval_ms: 2000,
            completion_channel: "done_jobs".to_string(),
            lease_ttl_ms: 5000,
            lease_retry_attempts: 20,
            lease_retry_delay_ms: 50,
            processed_jobs_ttl_seconds: 600,
        }
    }
}

impl EngineConfig {
    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn lease_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lease_retry_delay_ms)
    }

    pub fn processed_jobs_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_jobs_ttl_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("分块大小必须大于0"));
        }
        if self.task_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("任务TTL必须大于0"));
        }
        if self.job_timeout_seconds == 0 || self.result_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("作业超时和结果保留时间必须大于0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }
        if self.completion_channel.is_empty() {
            return Err(anyhow::anyhow!("完成通道名称不能为空"));
        }
        if self.lease_ttl_ms == 0 || self.lease_retry_attempts == 0 {
            return Err(anyhow::anyhow!("租约TTL和重试次数必须大于0"));
        }
        Ok(())
    }
}
