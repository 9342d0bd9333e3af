use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 一个分块: 结构ID -> 完整结构文档
pub type Chunk = BTreeMap<u32, StructureDocument>;

/// 结构文档
///
/// `data` 是不透明的化学数据，引擎从不解析它。
/// `results` 只出现在Worker输出中，汇聚时被移入 `models`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructureDocument {
    pub structure: u32,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub status: StructureStatus,
    #[serde(default, rename = "type")]
    pub structure_type: StructureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub additives: Vec<serde_json::Value>,
    #[serde(default)]
    pub description: Vec<serde_json::Value>,
    #[serde(default)]
    pub models: Vec<ModelResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultEntry>,
}

impl StructureDocument {
    pub fn new(structure: u32, data: serde_json::Value) -> Self {
        Self {
            structure,
            data,
            status: StructureStatus::default(),
            structure_type: StructureType::default(),
            temperature: None,
            pressure: None,
            additives: Vec::new(),
            description: Vec::new(),
            models: Vec::new(),
            results: Vec::new(),
        }
    }

    /// 取出Worker写入的结果并包装成模型结果块
    pub fn take_results(&mut self, model: i64) -> ModelResult {
        ModelResult {
            model,
            results: std::mem::take(&mut self.results),
        }
    }

    /// 追加模型结果块；同一模型的同一结果不会重复追加
    pub fn append_model_result(&mut self, block: ModelResult) -> bool {
        if self.models.contains(&block) {
            return false;
        }
        self.models.push(block);
        true
    }

    /// 按更新请求修改实验条件
    pub fn apply_update(&mut self, update: &StructureUpdate) {
        if let Some(additives) = &update.additives {
            self.additives = additives.clone();
        }
        if let Some(temperature) = update.temperature {
            self.temperature = Some(temperature);
        }
        if let Some(pressure) = update.pressure {
            self.pressure = Some(pressure);
        }
        if let Some(description) = &update.description {
            self.description = description.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StructureStatus {
    #[default]
    #[serde(rename = "RAW")]
    Raw,
    #[serde(rename = "HAS_ERROR")]
    HasError,
    #[serde(rename = "CLEAN")]
    Clean,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum StructureType {
    #[default]
    #[serde(rename = "UNDEFINED")]
    Undefined,
    #[serde(rename = "MOLECULE")]
    Molecule,
    #[serde(rename = "REACTION")]
    Reaction,
}

/// 单个模型对一个结构给出的结果块
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelResult {
    pub model: i64,
    #[serde(default)]
    pub results: Vec<ResultEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEntry {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(rename = "type")]
    pub result_type: ResultType,
}

impl ResultEntry {
    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: serde_json::Value::String(value.into()),
            result_type: ResultType::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResultType {
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "STRUCTURE")]
    Structure,
    #[serde(rename = "TABLE")]
    Table,
    #[serde(rename = "IMAGE")]
    Image,
    #[serde(rename = "GRAPH")]
    Graph,
    #[serde(rename = "GTM")]
    Gtm,
}

/// 处理阶段对单个结构的修改请求
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructureUpdate {
    pub structure: u32,
    #[serde(default)]
    pub additives: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub description: Option<Vec<serde_json::Value>>,
    /// 需要运行的模型ID
    #[serde(default)]
    pub models: Vec<i64>,
}
