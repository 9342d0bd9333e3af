use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{CompletionNotice, Destination, EndpointKey, Job};
use crate::CimmResult;

/// 目标节点上的作业队列
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// 队列名称
    fn name(&self) -> &str;

    /// 提交作业
    async fn enqueue(&self, job: &Job) -> CimmResult<()>;

    /// 读取作业，已被回收时返回 None
    async fn fetch_job(&self, job_id: &str) -> CimmResult<Option<Job>>;

    /// 删除作业记录
    async fn delete_job(&self, job_id: &str) -> CimmResult<()>;

    /// 当前排队中的作业数
    async fn len(&self) -> CimmResult<usize>;

    /// Worker端: 取出下一个排队作业并标记为执行中
    async fn take_next(&self) -> CimmResult<Option<Job>>;

    /// Worker端: 写回执行结果，并在完成通道上发布 (队列名, 作业ID)
    async fn complete(&self, job: &Job, channel: &str) -> CimmResult<()>;
}

/// 完成通知通道
///
/// 非阻塞轮询: 没有消息时立即返回 `Ok(None)`，一个慢端点不会拖住其他端点。
#[async_trait]
pub trait CompletionChannel: Send {
    async fn try_next(&mut self) -> CimmResult<Option<CompletionNotice>>;
}

/// 目标节点连接器
#[async_trait]
pub trait DestinationConnector: Send + Sync {
    /// 探活并返回目标节点的队列，不可达时返回连接类错误
    async fn connect(&self, destination: &Destination) -> CimmResult<Arc<dyn JobQueue>>;

    /// 按端点和队列名获取队列，监控器处理完成通知时使用
    async fn queue(&self, endpoint: &EndpointKey, queue_name: &str)
        -> CimmResult<Arc<dyn JobQueue>>;

    /// 订阅端点上的完成通道
    async fn subscribe(
        &self,
        endpoint: &EndpointKey,
        channel: &str,
    ) -> CimmResult<Box<dyn CompletionChannel>>;

    /// 丢弃端点的缓存连接，下次使用时重新连接
    async fn invalidate(&self, _endpoint: &EndpointKey) {}

    /// 目标节点当前队列长度
    async fn queue_length(&self, destination: &Destination) -> CimmResult<usize> {
        let queue = self.connect(destination).await?;
        queue.len().await
    }
}
