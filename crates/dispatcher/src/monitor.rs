//! 完成监控器
//!
//! 单个协作式循环，轮流非阻塞地轮询每个端点的完成通道:
//!
//! 1. 取出完成通知 (队列名, 作业ID)，读取作业
//! 2. 按Worker契约解析作业输出，失败的作业转换为逐结构的失败结果
//! 3. 在任务租约下合并结果、移除作业句柄、必要时翻转状态
//! 4. 删除作业记录，记下已处理标记，任务就绪时推送通知
//!
//! 某个端点出错只会跳过该端点，下一轮重新订阅并重建该端点的缓存连接；
//! 因租约占用或连接断开而未能处理的通知进入重试队列，下一轮再处理。

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use cimm_core::config::EngineConfig;
use cimm_core::models::{CompletionNotice, EndpointKey, TaskStatus};
use cimm_core::traits::{
    CompletionChannel, DestinationConnector, DestinationRegistry, StateStore, TaskNotifier,
};
use cimm_core::{CimmError, CimmResult, WorkerContract};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::chunk_store::ChunkStore;
use crate::task_store::TaskStore;

/// 每轮每个端点最多处理的通知数
const MAX_NOTICES_PER_ENDPOINT: usize = 100;

fn processed_key(job_id: &str) -> String {
    format!("processed:{job_id}")
}

/// 单条通知的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeOutcome {
    Merged {
        task_id: String,
        converged: Option<TaskStatus>,
    },
    /// 已处理过的作业
    Duplicate,
    /// 作业记录已不存在
    JobMissing,
    /// 作业尚未结束
    NotDone,
    /// 任务已过期或被删除
    TaskMissing,
    /// 任务中没有这个作业的句柄
    Untracked,
}

/// 一轮扫描的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub endpoints: usize,
    pub notices: usize,
    pub merged: usize,
    pub deferred: usize,
    pub failed_endpoints: usize,
}

pub struct CompletionMonitor {
    registry: Arc<dyn DestinationRegistry>,
    connector: Arc<dyn DestinationConnector>,
    state: Arc<dyn StateStore>,
    task_store: Arc<TaskStore>,
    chunk_store: Arc<ChunkStore>,
    notifier: Arc<dyn TaskNotifier>,
    config: EngineConfig,
    channels: Mutex<HashMap<EndpointKey, Box<dyn CompletionChannel>>>,
    deferred: Mutex<VecDeque<(EndpointKey, CompletionNotice)>>,
    running: Arc<RwLock<bool>>,
}

impl CompletionMonitor {
    pub fn new(
        registry: Arc<dyn DestinationRegistry>,
        connector: Arc<dyn DestinationConnector>,
        state: Arc<dyn StateStore>,
        task_store: Arc<TaskStore>,
        chunk_store: Arc<ChunkStore>,
        notifier: Arc<dyn TaskNotifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            connector,
            state,
            task_store,
            chunk_store,
            notifier,
            config,
            channels: Mutex::new(HashMap::new()),
            deferred: Mutex::new(VecDeque::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("完成监控器停止信号已发送");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 持续扫描直到 [`stop`](Self::stop) 被调用
    pub async fn run(&self) -> CimmResult<()> {
        info!(
            "启动完成监控器 (通道: {}, 轮询间隔: {}ms)",
            self.config.completion_channel, self.config.poll_interval_ms
        );
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        loop {
            if !self.is_running().await {
                info!("收到停止信号，完成监控器退出");
                break;
            }

            let stats = self.sweep().await;
            if stats.notices > 0 {
                debug!(
                    "本轮处理通知 {} 条，合并 {} 个作业，延后 {} 条",
                    stats.notices, stats.merged, stats.deferred
                );
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }

        Ok(())
    }

    /// 扫描一轮所有端点
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let retries: Vec<_> = self.deferred.lock().await.drain(..).collect();
        for (endpoint, notice) in retries {
            stats.notices += 1;
            self.process(&endpoint, notice, &mut stats).await;
        }

        let mut channels = self.channels.lock().await;
        self.refresh_subscriptions(&mut channels).await;

        let endpoints: Vec<EndpointKey> = channels.keys().cloned().collect();
        for endpoint in endpoints {
            stats.endpoints += 1;
            let Some(channel) = channels.get_mut(&endpoint) else {
                continue;
            };
            if let Err(e) = self.drain(&endpoint, channel.as_mut(), &mut stats).await {
                error!("端点 {} 轮询失败，下一轮重新订阅: {}", endpoint, e);
                stats.failed_endpoints += 1;
                channels.remove(&endpoint);
                self.connector.invalidate(&endpoint).await;
            }
        }

        stats
    }

    /// 为目录中每个不同的端点建立完成通道订阅
    async fn refresh_subscriptions(
        &self,
        channels: &mut HashMap<EndpointKey, Box<dyn CompletionChannel>>,
    ) {
        let destinations = match self.registry.all_destinations().await {
            Ok(destinations) => destinations,
            Err(e) => {
                error!("读取目标节点目录失败: {}", e);
                return;
            }
        };

        let endpoints: BTreeSet<EndpointKey> =
            destinations.iter().map(|d| d.endpoint()).collect();
        for endpoint in endpoints {
            if channels.contains_key(&endpoint) {
                continue;
            }
            match self
                .connector
                .subscribe(&endpoint, &self.config.completion_channel)
                .await
            {
                Ok(channel) => {
                    info!("已订阅端点 {} 的完成通道", endpoint);
                    channels.insert(endpoint, channel);
                }
                Err(e) => warn!("订阅端点 {} 失败，下一轮重试: {}", endpoint, e),
            }
        }
    }

    async fn drain(
        &self,
        endpoint: &EndpointKey,
        channel: &mut dyn CompletionChannel,
        stats: &mut SweepStats,
    ) -> CimmResult<()> {
        for _ in 0..MAX_NOTICES_PER_ENDPOINT {
            let Some(notice) = channel.try_next().await? else {
                break;
            };
            stats.notices += 1;
            self.process(endpoint, notice, stats).await;
        }
        Ok(())
    }

    async fn process(
        &self,
        endpoint: &EndpointKey,
        notice: CompletionNotice,
        stats: &mut SweepStats,
    ) {
        match self.handle_notice(endpoint, &notice).await {
            Ok(NoticeOutcome::Merged { .. }) => stats.merged += 1,
            Ok(outcome) => {
                debug!("通知 {}/{} 未合并: {:?}", notice.queue, notice.job_id, outcome);
                metrics::counter!("cimm_notices_dropped_total", "reason" => format!("{outcome:?}"))
                    .increment(1);
            }
            Err(e) if e.is_connectivity() || matches!(e, CimmError::LeaseUnavailable { .. }) => {
                warn!("处理作业 {} 暂时失败，下一轮重试: {}", notice.job_id, e);
                if e.is_connectivity() {
                    self.connector.invalidate(endpoint).await;
                }
                stats.deferred += 1;
                self.deferred.lock().await.push_back((endpoint.clone(), notice));
            }
            Err(e) => {
                error!("处理作业 {} 的完成通知失败: {}", notice.job_id, e);
                metrics::counter!("cimm_notices_dropped_total", "reason" => "error").increment(1);
            }
        }
    }

    /// 处理一条完成通知
    pub async fn handle_notice(
        &self,
        endpoint: &EndpointKey,
        notice: &CompletionNotice,
    ) -> CimmResult<NoticeOutcome> {
        let marker = processed_key(&notice.job_id);
        if self.state.get(&marker).await?.is_some() {
            debug!("作业 {} 已处理过，忽略重复通知", notice.job_id);
            return Ok(NoticeOutcome::Duplicate);
        }

        let queue = self.connector.queue(endpoint, &notice.queue).await?;
        let Some(job) = queue.fetch_job(&notice.job_id).await? else {
            warn!(
                "{}",
                CimmError::JobNotFound {
                    queue: notice.queue.clone(),
                    job_id: notice.job_id.clone(),
                }
            );
            return Ok(NoticeOutcome::JobMissing);
        };

        if !job.is_done() {
            warn!("作业 {} 尚未结束 ({:?})，忽略通知", job.id, job.status);
            return Ok(NoticeOutcome::NotDone);
        }

        let kind = self
            .registry
            .get_model(job.meta.model)
            .await?
            .map(|model| model.kind);
        let resolved = WorkerContract::resolve(kind, &job);

        let task_id = job.meta.task.clone();
        let chunk_store = self.chunk_store.clone();
        let job_id = job.id.clone();
        let model = job.meta.model;
        let ended_at = job.ended_at;

        let merged = self
            .task_store
            .advance(&task_id, move |task| {
                Box::pin(async move {
                    if !task.remove_job(&job_id) {
                        return Ok(None);
                    }
                    let task_id = task.id.clone();
                    chunk_store
                        .merge_results(&task_id, &mut task.chunks, resolved, model)
                        .await?;
                    if let Some(at) = ended_at {
                        task.touch(at);
                    }
                    Ok(Some((task.converge(), task.owner)))
                })
            })
            .await;

        let (converged, owner) = match merged {
            Ok(Some(result)) => result,
            Ok(None) => {
                warn!("任务 {} 中没有作业 {} 的句柄", task_id, job.id);
                queue.delete_job(&job.id).await?;
                return Ok(NoticeOutcome::Untracked);
            }
            Err(CimmError::TaskNotFound { .. }) => {
                warn!("作业 {} 所属的任务 {} 已不存在，丢弃结果", job.id, task_id);
                queue.delete_job(&job.id).await?;
                return Ok(NoticeOutcome::TaskMissing);
            }
            Err(e) => return Err(e),
        };

        queue.delete_job(&job.id).await?;
        self.state
            .set_ex(&marker, task_id.as_bytes(), self.config.processed_jobs_ttl())
            .await?;
        metrics::counter!("cimm_jobs_merged_total", "model" => model.to_string()).increment(1);
        info!("作业 {} 已合并到任务 {}", job.id, task_id);

        if let Some(status) = converged {
            info!("任务 {} 已就绪，状态: {}", task_id, status);
            metrics::counter!("cimm_tasks_converged_total", "status" => status.to_string())
                .increment(1);
            self.notify(owner, &task_id).await;
        }

        Ok(NoticeOutcome::Merged { task_id, converged })
    }

    /// 尽力推送，失败只记录日志
    async fn notify(&self, owner: i64, task_id: &str) {
        if let Err(e) = self.notifier.notify_ready(owner, task_id).await {
            warn!(
                "通过 {} 推送任务 {} 就绪通知失败: {}",
                self.notifier.name(),
                task_id,
                e
            );
            metrics::counter!("cimm_notifications_failed_total").increment(1);
        }
    }
}
