use async_trait::async_trait;

use crate::models::{Destination, ModelDescriptor, ModelKind};
use crate::CimmResult;

/// 模型与目标节点目录
///
/// 由外部维护，引擎只读。
#[async_trait]
pub trait DestinationRegistry: Send + Sync {
    async fn list_models(&self) -> CimmResult<Vec<ModelDescriptor>>;

    async fn get_model(&self, model_id: i64) -> CimmResult<Option<ModelDescriptor>>;

    /// 按注册顺序返回模型的目标节点
    async fn list_destinations(&self, model_id: i64) -> CimmResult<Vec<Destination>>;

    /// 所有模型的目标节点
    async fn all_destinations(&self) -> CimmResult<Vec<Destination>>;

    /// 结构预处理模型
    async fn preparer(&self) -> CimmResult<Option<ModelDescriptor>> {
        Ok(self
            .list_models()
            .await?
            .into_iter()
            .find(|m| m.kind == ModelKind::Preparer))
    }
}
