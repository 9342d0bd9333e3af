//! Worker输出契约
//!
//! 所有模型种类统一执行同一套规则:
//!
//! - 输出为空视为失败
//! - 非检索类模型不得改变结构数量
//! - 输出中不得出现输入里没有的结构ID，也不得重复
//! - 输出顺序不限，按结构ID与输入逐一比对
//! - 不得修改该模型种类冻结的字段
//!
//! 违反契约或Worker自报失败时，为每个输入结构生成一条失败结果，
//! 任务照常汇聚而不会卡住。

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::errors::{CimmError, CimmResult};
use crate::models::{DocumentField, Job, JobStatus, ModelKind, ResultEntry, StructureDocument};

pub const FAILURE_KEY: &str = "Modeling Failed";

pub struct WorkerContract;

impl WorkerContract {
    /// 校验Worker输出，违规时返回 `WorkerFailure`
    pub fn validate(
        kind: Option<ModelKind>,
        input: &[StructureDocument],
        output: &[StructureDocument],
    ) -> CimmResult<()> {
        if output.is_empty() {
            return Err(CimmError::WorkerFailure("Model returned nothing".to_string()));
        }

        let may_shrink = kind.map(ModelKind::may_change_cardinality).unwrap_or(false);
        if output.len() != input.len() && !may_shrink {
            return Err(CimmError::WorkerFailure("Model lost data".to_string()));
        }

        let known: HashMap<u32, &StructureDocument> =
            input.iter().map(|s| (s.structure, s)).collect();
        let mut seen = HashSet::with_capacity(output.len());
        for after in output {
            if !known.contains_key(&after.structure) {
                return Err(CimmError::WorkerFailure(
                    "Model returned unknown structures".to_string(),
                ));
            }
            if !seen.insert(after.structure) {
                return Err(CimmError::WorkerFailure(
                    "Model returned duplicate structures".to_string(),
                ));
            }
        }

        if let Some(kind) = kind {
            let frozen = kind.frozen_fields();
            let broken = output.iter().any(|after| {
                known
                    .get(&after.structure)
                    .is_some_and(|before| frozen.iter().any(|f| field_changed(*f, before, after)))
            });
            if broken {
                return Err(CimmError::WorkerFailure(kind.broken_data_reason().to_string()));
            }
        }

        Ok(())
    }

    /// 每个输入结构附带一条失败结果
    pub fn synthetic_failure(input: &[StructureDocument], reason: &str) -> Vec<StructureDocument> {
        input
            .iter()
            .cloned()
            .map(|mut s| {
                s.results = vec![ResultEntry::text(FAILURE_KEY, reason)];
                s
            })
            .collect()
    }

    /// 把已完成的作业解析为可汇聚的结构列表
    pub fn resolve(kind: Option<ModelKind>, job: &Job) -> Vec<StructureDocument> {
        match job.status {
            JobStatus::Finished => {
                let output = job.result.as_deref().unwrap_or(&[]);
                match Self::validate(kind, &job.structures, output) {
                    Ok(()) => output.to_vec(),
                    Err(e) => {
                        warn!("作业 {} 的输出违反Worker契约: {}", job.id, e);
                        Self::synthetic_failure(&job.structures, &failure_reason(&e))
                    }
                }
            }
            _ => {
                warn!(
                    "作业 {} 执行失败: {}",
                    job.id,
                    job.failure.as_deref().unwrap_or("未知错误")
                );
                Self::synthetic_failure(&job.structures, "Model not working")
            }
        }
    }
}

fn failure_reason(e: &CimmError) -> String {
    match e {
        CimmError::WorkerFailure(reason) => reason.clone(),
        other => other.to_string(),
    }
}

fn field_changed(field: DocumentField, a: &StructureDocument, b: &StructureDocument) -> bool {
    match field {
        DocumentField::Data => a.data != b.data,
        DocumentField::Structure => a.structure != b.structure,
        DocumentField::Status => a.status != b.status,
        DocumentField::Type => a.structure_type != b.structure_type,
        DocumentField::Temperature => a.temperature != b.temperature,
        DocumentField::Pressure => a.pressure != b.pressure,
        DocumentField::Additives => a.additives != b.additives,
        DocumentField::Description => a.description != b.description,
    }
}
