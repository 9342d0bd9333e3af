use serde::{Deserialize, Serialize};

use super::structure::StructureType;
use super::task::TaskType;

/// 目标节点: 为某个模型服务的一个Worker池实例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Destination {
    pub id: i64,
    pub model_id: i64,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    pub queue_name: String,
}

fn default_port() -> u16 {
    6379
}

impl Destination {
    /// 目标节点所在的共享状态存储端点
    pub fn endpoint(&self) -> EndpointKey {
        EndpointKey {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
        }
    }
}

/// 端点标识: 多个目标节点可能共用同一个存储实例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl EndpointKey {
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/0", password, self.host, self.port),
            None => format!("redis://{}:{}/0", self.host, self.port),
        }
    }
}

impl std::fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 已注册模型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: i64,
    pub name: String,
    pub kind: ModelKind,
    /// Worker端执行单元名称
    pub object: String,
}

/// 模型种类
///
/// 封闭枚举，启动时确定，不做运行时插件发现。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ModelKind {
    #[serde(rename = "PREPARER")]
    Preparer,
    #[serde(rename = "MOLECULE_MODELING")]
    MoleculeModeling,
    #[serde(rename = "REACTION_MODELING")]
    ReactionModeling,
    #[serde(rename = "MOLECULE_SEARCHING")]
    MoleculeSearching,
    #[serde(rename = "REACTION_SEARCHING")]
    ReactionSearching,
}

/// Worker返回时可能被比对的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    Data,
    Structure,
    Status,
    Type,
    Temperature,
    Pressure,
    Additives,
    Description,
}

impl ModelKind {
    /// 模型能否处理给定结构类型和任务类型
    pub fn compatible(self, structure_type: StructureType, task_type: TaskType) -> bool {
        matches!(
            (self, structure_type, task_type),
            (ModelKind::MoleculeModeling, StructureType::Molecule, TaskType::Modeling)
                | (ModelKind::ReactionModeling, StructureType::Reaction, TaskType::Modeling)
                | (ModelKind::MoleculeSearching, StructureType::Molecule, TaskType::Searching)
                | (ModelKind::ReactionSearching, StructureType::Reaction, TaskType::Searching)
        )
    }

    /// 只有检索类模型允许改变结构数量
    pub fn may_change_cardinality(self) -> bool {
        matches!(self, ModelKind::MoleculeSearching | ModelKind::ReactionSearching)
    }

    /// Worker不得修改的字段
    pub fn frozen_fields(self) -> &'static [DocumentField] {
        use DocumentField::*;
        match self {
            ModelKind::Preparer => &[Structure, Additives, Description],
            ModelKind::MoleculeModeling | ModelKind::ReactionModeling => &[
                Data,
                Structure,
                Status,
                Type,
                Temperature,
                Pressure,
                Additives,
                Description,
            ],
            ModelKind::MoleculeSearching | ModelKind::ReactionSearching => &[],
        }
    }

    /// 契约违规时使用的失败原因
    pub fn broken_data_reason(self) -> &'static str {
        match self {
            ModelKind::Preparer => "Preparing model not working",
            _ => "Model broke data",
        }
    }
}
