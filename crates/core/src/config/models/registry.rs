use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::{Destination, ModelDescriptor, ModelKind};

/// 静态模型目录: 模型及其目标节点列表
///
/// 目标节点的顺序即注册顺序，负载相同时按此顺序选择。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RegistryConfig {
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub id: i64,
    pub name: String,
    pub kind: ModelKind,
    pub object: String,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

impl ModelConfig {
    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            object: self.object.clone(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut model_ids = HashSet::new();
        let mut destination_ids = HashSet::new();

        for model in &self.models {
            if !model_ids.insert(model.id) {
                return Err(anyhow::anyhow!("模型ID重复: {}", model.id));
            }
            if model.object.is_empty() {
                return Err(anyhow::anyhow!("模型 {} 缺少执行单元名称", model.name));
            }
            for destination in &model.destinations {
                if !destination_ids.insert(destination.id) {
                    return Err(anyhow::anyhow!("目标节点ID重复: {}", destination.id));
                }
                if destination.model_id != model.id {
                    return Err(anyhow::anyhow!(
                        "目标节点 {} 的model_id与所属模型 {} 不一致",
                        destination.id,
                        model.id
                    ));
                }
                if destination.host.is_empty() || destination.queue_name.is_empty() {
                    return Err(anyhow::anyhow!("目标节点 {} 的地址或队列名为空", destination.id));
                }
            }
        }

        let preparers = self
            .models
            .iter()
            .filter(|m| m.kind == ModelKind::Preparer)
            .count();
        if !self.models.is_empty() && preparers != 1 {
            return Err(anyhow::anyhow!(
                "必须且只能配置一个预处理模型，当前为 {} 个",
                preparers
            ));
        }

        Ok(())
    }
}
