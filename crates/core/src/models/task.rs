use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 结构ID -> 分块ID 映射
pub type ChunkMap = BTreeMap<u32, String>;

/// 任务记录
///
/// 一个任务对应一批提交的结构以及其下所有尚未汇聚的作业。
/// 只要 `jobs` 非空，任务就处于"未就绪"状态。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符 (UUID 字符串)
/// - `status`: 生命周期状态
/// - `task_type`: 建模/检索/填充
/// - `owner`: 提交任务的用户ID
/// - `chunks`: 结构ID到分块ID的映射，分页读取依赖它
/// - `jobs`: 尚未完成汇聚的作业句柄，按提交顺序排列
/// - `dispatching`: 多个作业仍在分发中，期间即使 `jobs` 为空也不翻转状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    pub owner: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub chunks: ChunkMap,
    #[serde(default)]
    pub jobs: Vec<JobHandle>,
    #[serde(default)]
    pub dispatching: bool,
}

impl Task {
    pub fn new(id: String, owner: i64, task_type: TaskType, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            status,
            task_type,
            owner,
            created_at: now,
            updated_at: now,
            chunks: ChunkMap::new(),
            jobs: Vec::new(),
            dispatching: false,
        }
    }

    /// 没有未完成作业即视为就绪
    pub fn is_ready(&self) -> bool {
        self.jobs.is_empty() && !self.dispatching
    }

    /// 追加作业句柄，同一作业不会重复记录
    pub fn push_job(&mut self, handle: JobHandle) {
        if !self.jobs.iter().any(|h| h.job_id == handle.job_id) {
            self.jobs.push(handle);
        }
    }

    /// 移除作业句柄，返回是否确实移除
    pub fn remove_job(&mut self, job_id: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|h| h.job_id != job_id);
        before != self.jobs.len()
    }

    /// 推进更新时间，只会向后推进
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }

    /// 所有作业完成后翻转状态，返回新状态
    pub fn converge(&mut self) -> Option<TaskStatus> {
        if !self.is_ready() {
            return None;
        }
        let next = self.status.converged()?;
        self.status = next;
        Some(next)
    }

    /// 结构总数
    pub fn total_structures(&self) -> usize {
        self.chunks.len()
    }

    /// 不同分块数，即页数
    pub fn page_count(&self) -> usize {
        let mut ids: Vec<&String> = self.chunks.values().collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}

/// 任务生命周期状态
///
/// ```text
/// PREPARING --(准备作业全部完成)--> PREPARED
/// PROCESSING --(处理作业全部完成)--> PROCESSED
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PREPARING")]
    Preparing,
    #[serde(rename = "PREPARED")]
    Prepared,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "PROCESSED")]
    Processed,
}

impl TaskStatus {
    /// 汇聚完成后的目标状态；已就绪的状态返回 None
    pub fn converged(self) -> Option<TaskStatus> {
        match self {
            TaskStatus::Preparing => Some(TaskStatus::Prepared),
            TaskStatus::Processing => Some(TaskStatus::Processed),
            TaskStatus::Prepared | TaskStatus::Processed => None,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, TaskStatus::Preparing | TaskStatus::Processing)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Preparing => "PREPARING",
            TaskStatus::Prepared => "PREPARED",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Processed => "PROCESSED",
        };
        write!(f, "{s}")
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskType {
    #[serde(rename = "MODELING")]
    Modeling,
    #[serde(rename = "SEARCHING")]
    Searching,
    #[serde(rename = "POPULATING")]
    Populating,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Modeling => "MODELING",
            TaskType::Searching => "SEARCHING",
            TaskType::Populating => "POPULATING",
        };
        write!(f, "{s}")
    }
}

/// 作业句柄: (模型ID, 目标节点ID, 队列作业ID)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub model_id: i64,
    pub destination_id: i64,
    pub job_id: String,
}

/// 任务元数据视图
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMeta {
    pub task: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    pub owner: i64,
    pub updated_at: DateTime<Utc>,
    pub total: usize,
    pub pages: usize,
    pub page_size: usize,
}

impl TaskMeta {
    pub fn from_task(task: &Task, page_size: usize) -> Self {
        Self {
            task: task.id.clone(),
            status: task.status,
            task_type: task.task_type,
            owner: task.owner,
            updated_at: task.updated_at,
            total: task.total_structures(),
            pages: task.page_count().max(1),
            page_size,
        }
    }
}
