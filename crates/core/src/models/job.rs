use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::structure::StructureDocument;

/// 队列中的作业
///
/// 由分发器创建，Worker执行后写回 `result` 或 `failure`，
/// 完成监控器汇聚后删除。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub status: JobStatus,
    /// Worker端执行单元名称
    pub model_object: String,
    pub structures: Vec<StructureDocument>,
    pub meta: JobMeta,
    #[serde(default)]
    pub result: Option<Vec<StructureDocument>>,
    #[serde(default)]
    pub failure: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub timeout_seconds: u64,
    pub result_ttl_seconds: u64,
}

/// 作业归属信息，监控器据此定位任务和模型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobMeta {
    pub task: String,
    pub model: i64,
    pub destination: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "FAILED")]
    Failed,
}

impl Job {
    pub fn new(
        queue: impl Into<String>,
        model_object: impl Into<String>,
        structures: Vec<StructureDocument>,
        meta: JobMeta,
        timeout_seconds: u64,
        result_ttl_seconds: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.into(),
            status: JobStatus::Queued,
            model_object: model_object.into(),
            structures,
            meta,
            result: None,
            failure: None,
            enqueued_at: Utc::now(),
            ended_at: None,
            timeout_seconds,
            result_ttl_seconds,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == JobStatus::Finished
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status, JobStatus::Finished | JobStatus::Failed)
    }

    pub fn finish(&mut self, result: Vec<StructureDocument>) {
        self.status = JobStatus::Finished;
        self.result = Some(result);
        self.ended_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.failure = Some(reason.into());
        self.ended_at = Some(Utc::now());
    }
}

/// 完成通知: Worker在完成通道上发布 (队列名, 作业ID)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CompletionNotice {
    pub queue: String,
    pub job_id: String,
}

impl CompletionNotice {
    pub fn for_job(job: &Job) -> Self {
        Self {
            queue: job.queue.clone(),
            job_id: job.id.clone(),
        }
    }
}
