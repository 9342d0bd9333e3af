//! 任务存储
//!
//! 任务记录以JSON形式存放在与任务ID同名的键下，每次写入刷新TTL，
//! 任务引用的分块一并续期，分块与任务同时过期。
//! 所有修改都经过 [`TaskStore::advance`]: 先取得 `lease:{task_id}` 租约，
//! 再读取、修改、写回，最后释放租约。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use cimm_core::config::EngineConfig;
use cimm_core::models::{JobHandle, Task, TaskStatus, TaskType};
use cimm_core::traits::{StateStore, StateStoreExt};
use cimm_core::{CimmError, CimmResult};
use futures::future::BoxFuture;
use rand::Rng;
use tracing::{debug, warn};

pub struct TaskStore {
    store: Arc<dyn StateStore>,
    ttl: Duration,
    lease_ttl: Duration,
    lease_retry_attempts: u32,
    lease_retry_delay: Duration,
}

fn lease_key(task_id: &str) -> String {
    format!("lease:{task_id}")
}

impl TaskStore {
    pub fn new(store: Arc<dyn StateStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            ttl: config.task_ttl(),
            lease_ttl: config.lease_ttl(),
            lease_retry_attempts: config.lease_retry_attempts.max(1),
            lease_retry_delay: config.lease_retry_delay(),
        }
    }

    /// 新建处于 PREPARING 状态的任务
    pub async fn create(
        &self,
        owner: i64,
        task_type: TaskType,
        initial_jobs: Vec<JobHandle>,
    ) -> CimmResult<String> {
        let mut task = Task::new(
            uuid::Uuid::new_v4().to_string(),
            owner,
            task_type,
            TaskStatus::Preparing,
        );
        for job in initial_jobs {
            task.push_job(job);
        }
        self.insert(&task).await?;
        Ok(task.id)
    }

    /// 写入一条完整的任务记录
    pub async fn insert(&self, task: &Task) -> CimmResult<()> {
        self.store.set_json(&task.id, task, self.ttl).await?;
        let chunk_ids: BTreeSet<&String> = task.chunks.values().collect();
        for chunk_id in chunk_ids {
            if !self.store.expire(chunk_id, self.ttl).await? {
                warn!("任务 {} 引用的分块 {} 已不存在", task.id, chunk_id);
            }
        }
        debug!("保存任务 {} (状态: {}, 作业数: {})", task.id, task.status, task.jobs.len());
        Ok(())
    }

    pub async fn read(&self, task_id: &str) -> CimmResult<Task> {
        self.store
            .get_json::<Task>(task_id)
            .await?
            .ok_or_else(|| CimmError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    /// 读取已就绪且处于指定状态的任务
    pub async fn read_ready(&self, task_id: &str, expected: TaskStatus) -> CimmResult<Task> {
        let task = self.read(task_id).await?;
        Self::ensure_ready(&task, expected)?;
        Ok(task)
    }

    /// 任务必须处于 `expected` 且没有未完成作业
    ///
    /// 还在等待作业、即将进入 `expected` 的任务报告"尚未就绪"。
    pub fn ensure_ready(task: &Task, expected: TaskStatus) -> CimmResult<()> {
        if task.status == expected && task.is_ready() {
            return Ok(());
        }
        if task.status == expected || task.status.converged() == Some(expected) {
            return Err(CimmError::invalid_state(&task.id, "任务尚未就绪"));
        }
        Err(CimmError::invalid_state(
            &task.id,
            format!("期望状态 {}，实际为 {}", expected, task.status),
        ))
    }

    pub async fn delete(&self, task_id: &str) -> CimmResult<bool> {
        self.store.delete(task_id).await
    }

    /// 在租约保护下读取、修改并写回任务
    ///
    /// `mutator` 返回错误时不写回。任务不存在时返回 `TaskNotFound`。
    pub async fn advance<T, F>(&self, task_id: &str, mutator: F) -> CimmResult<T>
    where
        T: Send,
        F: for<'a> FnOnce(&'a mut Task) -> BoxFuture<'a, CimmResult<T>> + Send,
    {
        let token = uuid::Uuid::new_v4().to_string();
        self.acquire(task_id, &token).await?;

        let result = self.mutate(task_id, mutator).await;

        let key = lease_key(task_id);
        match self.store.unlock(&key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!("任务 {} 的租约已过期，修改期间可能与其他写入者重叠", task_id),
            Err(e) => warn!("释放任务 {} 的租约失败: {}", task_id, e),
        }

        result
    }

    async fn mutate<T, F>(&self, task_id: &str, mutator: F) -> CimmResult<T>
    where
        T: Send,
        F: for<'a> FnOnce(&'a mut Task) -> BoxFuture<'a, CimmResult<T>> + Send,
    {
        let mut task = self.read(task_id).await?;
        let value = mutator(&mut task).await?;
        self.insert(&task).await?;
        Ok(value)
    }

    async fn acquire(&self, task_id: &str, token: &str) -> CimmResult<()> {
        let key = lease_key(task_id);
        for attempt in 0..self.lease_retry_attempts {
            if self.store.try_lock(&key, token, self.lease_ttl).await? {
                return Ok(());
            }
            if attempt + 1 < self.lease_retry_attempts {
                tokio::time::sleep(self.jittered_delay()).await;
            }
        }
        warn!(
            "任务 {} 的租约被占用，已重试 {} 次",
            task_id, self.lease_retry_attempts
        );
        Err(CimmError::LeaseUnavailable {
            task_id: task_id.to_string(),
        })
    }

    fn jittered_delay(&self) -> Duration {
        let base = self.lease_retry_delay.as_millis() as u64;
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}
