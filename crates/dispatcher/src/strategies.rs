use std::sync::Arc;

use async_trait::async_trait;
use cimm_core::models::Destination;
use cimm_core::traits::JobQueue;
use cimm_core::CimmResult;
use tracing::debug;

/// 探活成功的目标节点
#[derive(Clone)]
pub struct Candidate {
    pub destination: Destination,
    pub queue: Arc<dyn JobQueue>,
    pub queue_length: usize,
    /// 在模型目录中的位置
    pub registry_index: usize,
}

/// 目标节点选择策略
///
/// 返回尝试顺序；分发器依次提交，前一个失败时换下一个。
#[async_trait]
pub trait DestinationSelectionStrategy: Send + Sync {
    async fn rank(&self, candidates: Vec<Candidate>) -> CimmResult<Vec<Candidate>>;

    fn name(&self) -> &str;
}

/// 最少排队优先，排队长度相同时按注册顺序
pub struct LeastLoadedStrategy;

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastLoadedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationSelectionStrategy for LeastLoadedStrategy {
    async fn rank(&self, mut candidates: Vec<Candidate>) -> CimmResult<Vec<Candidate>> {
        candidates.sort_by_key(|c| (c.queue_length, c.registry_index));

        if let Some(first) = candidates.first() {
            debug!(
                "负载均衡策略选择目标节点: {} (排队: {}，候选: {})",
                first.destination.id,
                first.queue_length,
                candidates.len()
            );
        }

        Ok(candidates)
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}
