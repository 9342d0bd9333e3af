//! 提交服务
//!
//! 对外接口层 (HTTP等) 的核心逻辑: 创建任务、提交处理、分页读取和删除。
//! 所有读取都校验任务归属和就绪状态。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cimm_core::models::{
    ModelDescriptor, StructureDocument, StructureStatus, StructureUpdate, Task, TaskMeta,
    TaskStatus, TaskType,
};
use cimm_core::traits::{DestinationRegistry, TaskNotifier};
use cimm_core::{CimmError, CimmResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunk_store::ChunkStore;
use crate::dispatcher::{Dispatcher, NewTask, TaskTarget};
use crate::task_store::TaskStore;

/// 一次读取的结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPage {
    pub meta: TaskMeta,
    pub structures: Vec<StructureDocument>,
}

pub struct SubmissionService {
    registry: Arc<dyn DestinationRegistry>,
    dispatcher: Arc<Dispatcher>,
    task_store: Arc<TaskStore>,
    chunk_store: Arc<ChunkStore>,
    notifier: Arc<dyn TaskNotifier>,
}

impl SubmissionService {
    pub fn new(
        registry: Arc<dyn DestinationRegistry>,
        dispatcher: Arc<Dispatcher>,
        task_store: Arc<TaskStore>,
        chunk_store: Arc<ChunkStore>,
        notifier: Arc<dyn TaskNotifier>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            task_store,
            chunk_store,
            notifier,
        }
    }

    fn meta(&self, task: &Task) -> TaskMeta {
        TaskMeta::from_task(task, self.chunk_store.chunk_size())
    }

    /// 结构重新编号为 1..n，清掉客户端带来的结果
    fn normalize(
        task_type: TaskType,
        mut structures: Vec<StructureDocument>,
    ) -> CimmResult<Vec<StructureDocument>> {
        if structures.is_empty() {
            return Err(CimmError::InvalidInput("结构列表为空".to_string()));
        }
        if task_type == TaskType::Searching {
            structures.truncate(1);
        }
        for (index, structure) in structures.iter_mut().enumerate() {
            structure.structure = index as u32 + 1;
            structure.models.clear();
            structure.results.clear();
        }
        Ok(structures)
    }

    /// 提交一批结构，交给预处理模型
    pub async fn create_task(
        &self,
        owner: i64,
        task_type: TaskType,
        structures: Vec<StructureDocument>,
    ) -> CimmResult<TaskMeta> {
        let structures = Self::normalize(task_type, structures)?;
        let preparer = self
            .registry
            .preparer()
            .await?
            .ok_or_else(|| CimmError::Configuration("未配置预处理模型".to_string()))?;

        let count = structures.len();
        let (_, task_id) = self
            .dispatcher
            .enqueue(
                &preparer,
                structures,
                TaskTarget::New(NewTask { owner, task_type }),
            )
            .await?;
        info!("用户 {} 创建任务 {} ({} 个结构)", owner, task_id, count);

        let task = self.task_store.read(&task_id).await?;
        Ok(self.meta(&task))
    }

    /// 直接保存已准备好的结构，不经过预处理
    pub async fn create_prepared_task(
        &self,
        owner: i64,
        task_type: TaskType,
        structures: Vec<StructureDocument>,
    ) -> CimmResult<TaskMeta> {
        let structures = Self::normalize(task_type, structures)?;
        let mut task = Task::new(
            uuid::Uuid::new_v4().to_string(),
            owner,
            task_type,
            TaskStatus::Prepared,
        );
        task.chunks = self.chunk_store.put_page(&task.id, structures).await?;
        self.task_store.insert(&task).await?;
        Ok(self.meta(&task))
    }

    /// 对已准备好的任务提交模型处理
    ///
    /// 只处理状态为 CLEAN 的结构；每个结构按更新请求修改实验条件，
    /// 并归入与其类型兼容的模型。每个模型一个作业，归属新的 PROCESSING 任务。
    pub async fn process_task(
        &self,
        owner: i64,
        task_id: &str,
        updates: Vec<StructureUpdate>,
    ) -> CimmResult<TaskMeta> {
        let prepared = self.load(owner, task_id, TaskStatus::Prepared).await?;
        if prepared.task_type == TaskType::Populating {
            return Err(CimmError::invalid_state(task_id, "无效的任务类型"));
        }

        let models: HashMap<i64, ModelDescriptor> = self
            .registry
            .list_models()
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();
        let updates: HashMap<u32, StructureUpdate> =
            updates.into_iter().map(|u| (u.structure, u)).collect();

        let mut batches: BTreeMap<i64, Vec<StructureDocument>> = BTreeMap::new();
        for mut structure in self.chunk_store.fetch_all(&prepared.chunks).await? {
            if structure.status != StructureStatus::Clean {
                continue;
            }
            let Some(update) = updates.get(&structure.structure) else {
                continue;
            };
            structure.apply_update(update);
            structure.models.clear();
            for model_id in &update.models {
                let model = models
                    .get(model_id)
                    .ok_or_else(|| CimmError::InvalidInput(format!("未知模型: {model_id}")))?;
                if model.kind.compatible(structure.structure_type, prepared.task_type) {
                    batches.entry(*model_id).or_default().push(structure.clone());
                }
            }
        }

        let Some(first_model) = batches.keys().next().copied() else {
            return Err(CimmError::InvalidInput("没有可提交处理的结构".to_string()));
        };

        let mut task = Task::new(
            uuid::Uuid::new_v4().to_string(),
            owner,
            prepared.task_type,
            TaskStatus::Processing,
        );
        task.dispatching = true;
        self.task_store.insert(&task).await?;

        let mut dispatched = 0;
        for (model_id, batch) in batches {
            let Some(model) = models.get(&model_id) else {
                continue;
            };
            match self
                .dispatcher
                .enqueue(model, batch, TaskTarget::Existing(&task.id))
                .await
            {
                Ok(_) => dispatched += 1,
                Err(CimmError::DispatchUnavailable { model_id }) => {
                    warn!("模型 {} 不可用，任务 {} 跳过该模型", model_id, task.id);
                }
                Err(e) => {
                    self.task_store.delete(&task.id).await?;
                    return Err(e);
                }
            }
        }

        if dispatched == 0 {
            self.task_store.delete(&task.id).await?;
            return Err(CimmError::DispatchUnavailable {
                model_id: first_model,
            });
        }

        let page_size = self.chunk_store.chunk_size();
        let (meta, converged) = self
            .task_store
            .advance(&task.id, move |task| {
                Box::pin(async move {
                    task.dispatching = false;
                    let converged = task.converge();
                    Ok((TaskMeta::from_task(task, page_size), converged))
                })
            })
            .await?;

        if converged.is_some() {
            if let Err(e) = self.notifier.notify_ready(owner, &task.id).await {
                warn!("推送任务 {} 就绪通知失败: {}", task.id, e);
            }
        }

        info!(
            "用户 {} 基于任务 {} 创建处理任务 {} ({} 个作业)",
            owner, task_id, task.id, dispatched
        );
        Ok(meta)
    }

    /// 读取任务的结构，`page` 为空时返回全部
    pub async fn fetch(
        &self,
        owner: i64,
        task_id: &str,
        expected: TaskStatus,
        page: Option<usize>,
    ) -> CimmResult<TaskPage> {
        let task = self.load(owner, task_id, expected).await?;
        let structures = match page {
            Some(page) => self.chunk_store.fetch_page(&task.chunks, page).await?,
            None => self.chunk_store.fetch_all(&task.chunks).await?,
        };
        Ok(TaskPage {
            meta: self.meta(&task),
            structures,
        })
    }

    pub async fn fetch_meta(
        &self,
        owner: i64,
        task_id: &str,
        expected: TaskStatus,
    ) -> CimmResult<TaskMeta> {
        let task = self.load(owner, task_id, expected).await?;
        Ok(self.meta(&task))
    }

    /// 删除任务记录，分块随TTL过期
    pub async fn delete_task(&self, owner: i64, task_id: &str) -> CimmResult<()> {
        let task = self.task_store.read(task_id).await?;
        Self::ensure_owner(&task, owner)?;
        self.task_store.delete(task_id).await?;
        info!("用户 {} 删除任务 {}", owner, task_id);
        Ok(())
    }

    async fn load(&self, owner: i64, task_id: &str, expected: TaskStatus) -> CimmResult<Task> {
        let task = self.task_store.read(task_id).await?;
        Self::ensure_owner(&task, owner)?;
        TaskStore::ensure_ready(&task, expected)?;
        Ok(task)
    }

    fn ensure_owner(task: &Task, owner: i64) -> CimmResult<()> {
        if task.owner != owner {
            return Err(CimmError::AccessDenied {
                task_id: task.id.clone(),
                user: owner,
            });
        }
        Ok(())
    }
}
