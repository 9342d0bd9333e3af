//! 测试用Worker
//!
//! 从目标节点队列取出作业，按设定的行为产生输出，写回作业并在完成通道上发布通知。

use std::sync::Arc;

use cimm_core::models::{Destination, Job, ResultEntry, StructureDocument, StructureStatus};
use cimm_core::traits::DestinationConnector;
use cimm_core::CimmResult;
use tracing::debug;

type OutputFn = dyn Fn(&[StructureDocument]) -> Vec<StructureDocument> + Send + Sync;

/// Worker的行为
#[derive(Clone)]
pub enum WorkerBehavior {
    /// 原样返回
    Echo,
    /// 预处理: 把结构标记为 CLEAN
    Prepare,
    /// 为每个结构写入一条文本结果，值为结构ID
    Annotate(String),
    /// 报告失败
    Fail(String),
    Custom(Arc<OutputFn>),
}

impl WorkerBehavior {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[StructureDocument]) -> Vec<StructureDocument> + Send + Sync + 'static,
    {
        WorkerBehavior::Custom(Arc::new(f))
    }

    fn apply(&self, job: &mut Job) {
        let input = job.structures.clone();
        match self {
            WorkerBehavior::Echo => job.finish(input),
            WorkerBehavior::Prepare => job.finish(
                input
                    .into_iter()
                    .map(|mut s| {
                        s.status = StructureStatus::Clean;
                        s
                    })
                    .collect(),
            ),
            WorkerBehavior::Annotate(key) => job.finish(
                input
                    .into_iter()
                    .map(|mut s| {
                        s.results = vec![ResultEntry::text(key.clone(), s.structure.to_string())];
                        s
                    })
                    .collect(),
            ),
            WorkerBehavior::Fail(reason) => job.fail(reason.clone()),
            WorkerBehavior::Custom(f) => job.finish(f(&input)),
        }
    }
}

pub struct FakeWorker {
    connector: Arc<dyn DestinationConnector>,
    destination: Destination,
    channel: String,
    behavior: WorkerBehavior,
}

impl FakeWorker {
    pub fn new(
        connector: Arc<dyn DestinationConnector>,
        destination: Destination,
        channel: &str,
        behavior: WorkerBehavior,
    ) -> Self {
        Self {
            connector,
            destination,
            channel: channel.to_string(),
            behavior,
        }
    }

    /// 执行一个作业，队列为空时返回 None
    pub async fn run_once(&self) -> CimmResult<Option<Job>> {
        let queue = self.connector.connect(&self.destination).await?;
        let Some(mut job) = queue.take_next().await? else {
            return Ok(None);
        };
        self.behavior.apply(&mut job);
        queue.complete(&job, &self.channel).await?;
        debug!("测试Worker完成作业 {} ({:?})", job.id, job.status);
        Ok(Some(job))
    }

    /// 执行队列中所有作业，返回完成的作业
    pub async fn drain(&self) -> CimmResult<Vec<Job>> {
        let mut done = Vec::new();
        while let Some(job) = self.run_once().await? {
            done.push(job);
        }
        Ok(done)
    }
}
