//! 测试数据构建器

use cimm_core::config::{ModelConfig, RegistryConfig};
use cimm_core::models::{
    Destination, ModelKind, StructureDocument, StructureStatus, StructureType,
};
use serde_json::json;

/// 构建结构文档，默认是一个未清洗的分子
pub struct StructureBuilder {
    structure: StructureDocument,
}

impl StructureBuilder {
    pub fn new(id: u32) -> Self {
        let mut structure = StructureDocument::new(id, json!(format!("C{id}")));
        structure.structure_type = StructureType::Molecule;
        Self { structure }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.structure.data = data;
        self
    }

    pub fn with_type(mut self, structure_type: StructureType) -> Self {
        self.structure.structure_type = structure_type;
        self
    }

    pub fn with_status(mut self, status: StructureStatus) -> Self {
        self.structure.status = status;
        self
    }

    pub fn clean(self) -> Self {
        self.with_status(StructureStatus::Clean)
    }

    pub fn reaction(self) -> Self {
        self.with_type(StructureType::Reaction)
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.structure.temperature = Some(temperature);
        self
    }

    pub fn build(self) -> StructureDocument {
        self.structure
    }
}

/// `n` 个编号为 1..=n 的分子
pub fn molecules(n: u32) -> Vec<StructureDocument> {
    (1..=n).map(|i| StructureBuilder::new(i).build()).collect()
}

/// 构建目标节点，默认 127.0.0.1:6379 上的 "default" 队列
pub struct DestinationBuilder {
    destination: Destination,
}

impl DestinationBuilder {
    pub fn new() -> Self {
        Self {
            destination: Destination {
                id: 1,
                model_id: 1,
                host: "127.0.0.1".to_string(),
                port: 6379,
                password: None,
                queue_name: "default".to_string(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.destination.id = id;
        self
    }

    pub fn with_model(mut self, model_id: i64) -> Self {
        self.destination.model_id = model_id;
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.destination.host = host.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.destination.port = port;
        self
    }

    pub fn with_queue(mut self, queue_name: &str) -> Self {
        self.destination.queue_name = queue_name.to_string();
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.destination.password = Some(password.to_string());
        self
    }

    pub fn build(self) -> Destination {
        self.destination
    }
}

impl Default for DestinationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构建模型条目，目标节点的 `model_id` 自动对齐
pub struct ModelBuilder {
    model: ModelConfig,
}

impl ModelBuilder {
    pub fn new(id: i64, kind: ModelKind) -> Self {
        Self {
            model: ModelConfig {
                id,
                name: format!("model-{id}"),
                kind,
                object: format!("model_{id}"),
                destinations: Vec::new(),
            },
        }
    }

    pub fn preparer(id: i64) -> Self {
        Self::new(id, ModelKind::Preparer)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.model.name = name.to_string();
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.model.destinations.push(Destination {
            model_id: self.model.id,
            ..destination
        });
        self
    }

    pub fn build(self) -> ModelConfig {
        self.model
    }
}

/// 由若干模型组成的目录
pub fn registry_of(models: Vec<ModelConfig>) -> RegistryConfig {
    RegistryConfig { models }
}
