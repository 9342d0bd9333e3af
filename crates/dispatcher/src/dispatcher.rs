use std::sync::Arc;

use cimm_core::config::EngineConfig;
use cimm_core::models::{Job, JobHandle, JobMeta, ModelDescriptor, StructureDocument, TaskType};
use cimm_core::traits::{DestinationConnector, DestinationRegistry};
use cimm_core::{CimmError, CimmResult};
use tracing::{debug, info, warn};

use crate::strategies::{Candidate, DestinationSelectionStrategy, LeastLoadedStrategy};
use crate::task_store::TaskStore;

/// 作业分发器
///
/// 每次分发都重新探测模型的全部目标节点，按策略排序后依次尝试提交。
/// 作业句柄先写入任务再入队，监控器总能在任务中找到它。
pub struct Dispatcher {
    registry: Arc<dyn DestinationRegistry>,
    connector: Arc<dyn DestinationConnector>,
    task_store: Arc<TaskStore>,
    strategy: Arc<dyn DestinationSelectionStrategy>,
    config: EngineConfig,
}

/// 新建任务时的归属信息
#[derive(Debug, Clone, Copy)]
pub struct NewTask {
    pub owner: i64,
    pub task_type: TaskType,
}

/// 作业归属的任务
#[derive(Debug, Clone, Copy)]
pub enum TaskTarget<'a> {
    /// 新建 PREPARING 任务，本作业是唯一的未完成作业
    New(NewTask),
    /// 追加到已有任务
    Existing(&'a str),
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn DestinationRegistry>,
        connector: Arc<dyn DestinationConnector>,
        task_store: Arc<TaskStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            connector,
            task_store,
            strategy: Arc::new(LeastLoadedStrategy::new()),
            config,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn DestinationSelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// 探测模型的所有目标节点，丢弃不可达的，按策略排序
    pub async fn probe(&self, model_id: i64) -> CimmResult<Vec<Candidate>> {
        let destinations = self.registry.list_destinations(model_id).await?;
        let mut candidates = Vec::with_capacity(destinations.len());

        for (registry_index, destination) in destinations.into_iter().enumerate() {
            let probed = async {
                let queue = self.connector.connect(&destination).await?;
                let queue_length = queue.len().await?;
                Ok::<_, CimmError>((queue, queue_length))
            }
            .await;

            match probed {
                Ok((queue, queue_length)) => {
                    debug!(
                        "目标节点 {} 排队长度: {}",
                        destination.id, queue_length
                    );
                    candidates.push(Candidate {
                        destination,
                        queue,
                        queue_length,
                        registry_index,
                    });
                }
                Err(e) if e.is_connectivity() => {
                    warn!("目标节点 {} 不可达，跳过: {}", destination.id, e);
                }
                Err(e) => return Err(e),
            }
        }

        self.strategy.rank(candidates).await
    }

    /// 把一批结构作为一个作业提交给模型
    ///
    /// 返回作业句柄和任务ID。所有目标节点都不可达时返回 `DispatchUnavailable`。
    /// 新建任务时先创建 PREPARING 任务再提交作业，任何一步失败都会删除该任务；
    /// 已有任务保持不变。
    pub async fn enqueue(
        &self,
        model: &ModelDescriptor,
        structures: Vec<StructureDocument>,
        target: TaskTarget<'_>,
    ) -> CimmResult<(JobHandle, String)> {
        let candidates = self.probe(model.id).await?;
        if candidates.is_empty() {
            warn!("模型 {} ({}) 没有可达的目标节点", model.id, model.name);
            return Err(CimmError::DispatchUnavailable { model_id: model.id });
        }

        let (task_id, created) = match target {
            TaskTarget::Existing(task_id) => (task_id.to_string(), false),
            TaskTarget::New(new) => {
                let task_id = self
                    .task_store
                    .create(new.owner, new.task_type, Vec::new())
                    .await?;
                (task_id, true)
            }
        };

        match self.submit(model, &structures, &task_id, candidates).await {
            Ok(handle) => Ok((handle, task_id)),
            Err(e) => {
                if created {
                    if let Err(cleanup) = self.task_store.delete(&task_id).await {
                        warn!("删除未分发成功的任务 {} 失败: {}", task_id, cleanup);
                    }
                }
                if matches!(e, CimmError::DispatchUnavailable { .. }) {
                    metrics::counter!("cimm_dispatch_unavailable_total", "model" => model.id.to_string())
                        .increment(1);
                }
                Err(e)
            }
        }
    }

    /// 按排序依次尝试候选节点，先记录句柄再提交，提交失败时撤回句柄
    async fn submit(
        &self,
        model: &ModelDescriptor,
        structures: &[StructureDocument],
        task_id: &str,
        candidates: Vec<Candidate>,
    ) -> CimmResult<JobHandle> {
        for candidate in candidates {
            let destination = &candidate.destination;
            let job = Job::new(
                destination.queue_name.clone(),
                model.object.clone(),
                structures.to_vec(),
                JobMeta {
                    task: task_id.to_string(),
                    model: model.id,
                    destination: destination.id,
                },
                self.config.job_timeout_seconds,
                self.config.result_ttl_seconds,
            );
            let handle = JobHandle {
                model_id: model.id,
                destination_id: destination.id,
                job_id: job.id.clone(),
            };

            let recorded = handle.clone();
            self.task_store
                .advance(task_id, move |task| {
                    Box::pin(async move {
                        task.push_job(recorded);
                        Ok(())
                    })
                })
                .await?;

            match candidate.queue.enqueue(&job).await {
                Ok(()) => {
                    info!(
                        "作业 {} 已分发到目标节点 {} (模型: {}, 任务: {})",
                        job.id, destination.id, model.id, task_id
                    );
                    metrics::counter!("cimm_jobs_dispatched_total", "model" => model.id.to_string())
                        .increment(1);
                    return Ok(handle);
                }
                Err(e) => {
                    let job_id = job.id.clone();
                    self.task_store
                        .advance(task_id, move |task| {
                            Box::pin(async move {
                                task.remove_job(&job_id);
                                Ok(())
                            })
                        })
                        .await?;

                    if !e.is_connectivity() {
                        return Err(e);
                    }
                    warn!(
                        "向目标节点 {} 提交作业失败，尝试下一个: {}",
                        destination.id, e
                    );
                }
            }
        }

        Err(CimmError::DispatchUnavailable { model_id: model.id })
    }
}
