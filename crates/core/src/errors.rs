use thiserror::Error;

/// 引擎错误类型定义
#[derive(Debug, Error)]
pub enum CimmError {
    #[error("模型 {model_id} 没有可达的目标节点")]
    DispatchUnavailable { model_id: i64 },

    #[error("任务 {task_id} 状态无效: {message}")]
    InvalidTaskState { task_id: String, message: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("页面未找到: 第 {page} 页 (共 {pages} 页)")]
    PageNotFound { page: usize, pages: usize },

    #[error("作业未找到: 队列 {queue} 中的 {job_id}")]
    JobNotFound { queue: String, job_id: String },

    #[error("Worker执行失败: {0}")]
    WorkerFailure(String),

    #[error("用户 {user} 无权访问任务 {task_id}")]
    AccessDenied { task_id: String, user: i64 },

    #[error("无效的输入数据: {0}")]
    InvalidInput(String),

    #[error("无法获取任务 {task_id} 的租约")]
    LeaseUnavailable { task_id: String },

    #[error("共享状态存储错误: {0}")]
    StateStore(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("通知发送失败: {0}")]
    Notification(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl CimmError {
    /// 连接类错误: 分发时换下一个目标节点，监控循环中跳过当前端点
    pub fn is_connectivity(&self) -> bool {
        matches!(self, CimmError::StateStore(_))
    }

    pub fn invalid_state(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        CimmError::InvalidTaskState {
            task_id: task_id.into(),
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for CimmError {
    fn from(e: redis::RedisError) -> Self {
        CimmError::StateStore(e.to_string())
    }
}

impl From<serde_json::Error> for CimmError {
    fn from(e: serde_json::Error) -> Self {
        CimmError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type CimmResult<T> = std::result::Result<T, CimmError>;
