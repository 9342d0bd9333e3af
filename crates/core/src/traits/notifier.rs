use async_trait::async_trait;

use crate::CimmResult;

/// 任务就绪通知
///
/// 尽力而为的推送，按任务所属用户寻址；客户端仍需能够直接轮询任务状态。
#[async_trait]
pub trait TaskNotifier: Send + Sync {
    async fn notify_ready(&self, owner: i64, task_id: &str) -> CimmResult<()>;

    fn name(&self) -> &str;
}
