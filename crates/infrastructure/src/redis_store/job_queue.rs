use async_trait::async_trait;
use cimm_core::models::{CompletionNotice, Job, JobStatus};
use cimm_core::traits::JobQueue;
use cimm_core::CimmResult;
use redis::aio::MultiplexedConnection;
use tracing::debug;

pub(crate) fn queue_key(name: &str) -> String {
    format!("cimm:queue:{name}")
}

pub(crate) fn job_key(job_id: &str) -> String {
    format!("cimm:job:{job_id}")
}

/// 目标节点上的作业队列
///
/// 布局:
/// - `cimm:queue:{name}`: 排队中的作业ID列表，左进右出
/// - `cimm:job:{id}`: 作业记录 (JSON)，带过期时间
pub struct RedisJobQueue {
    name: String,
    connection: MultiplexedConnection,
}

impl RedisJobQueue {
    pub fn new(name: impl Into<String>, connection: MultiplexedConnection) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }

    async fn store(&self, job: &Job, ttl_seconds: u64) -> CimmResult<()> {
        let mut conn = self.connection.clone();
        let raw = serde_json::to_vec(job)?;
        let _: () = redis::cmd("SET")
            .arg(job_key(&job.id))
            .arg(raw)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, job: &Job) -> CimmResult<()> {
        let mut conn = self.connection.clone();
        let raw = serde_json::to_vec(job)?;
        // 排队期间的记录保留到超时加结果保留时间
        let ttl = job.timeout_seconds + job.result_ttl_seconds;
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(job_key(&job.id))
            .arg(raw)
            .arg("EX")
            .arg(ttl.max(1))
            .ignore()
            .cmd("LPUSH")
            .arg(queue_key(&self.name))
            .arg(&job.id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        debug!("作业 {} 已进入队列 {}", job.id, self.name);
        Ok(())
    }

    async fn fetch_job(&self, job_id: &str) -> CimmResult<Option<Job>> {
        let mut conn = self.connection.clone();
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(job_key(job_id))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete_job(&self, job_id: &str) -> CimmResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(job_key(job_id))
            .ignore()
            .cmd("LREM")
            .arg(queue_key(&self.name))
            .arg(0)
            .arg(job_id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn len(&self) -> CimmResult<usize> {
        let mut conn = self.connection.clone();
        let len: usize = redis::cmd("LLEN")
            .arg(queue_key(&self.name))
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn take_next(&self) -> CimmResult<Option<Job>> {
        let mut conn = self.connection.clone();
        loop {
            let job_id: Option<String> = redis::cmd("RPOP")
                .arg(queue_key(&self.name))
                .query_async(&mut conn)
                .await?;
            let Some(job_id) = job_id else {
                return Ok(None);
            };
            // 记录已过期的作业直接跳过
            if let Some(mut job) = self.fetch_job(&job_id).await? {
                job.status = JobStatus::Started;
                self.store(&job, job.timeout_seconds + job.result_ttl_seconds)
                    .await?;
                return Ok(Some(job));
            }
        }
    }

    async fn complete(&self, job: &Job, channel: &str) -> CimmResult<()> {
        self.store(job, job.result_ttl_seconds).await?;

        let mut conn = self.connection.clone();
        let notice = serde_json::to_vec(&CompletionNotice::for_job(job))?;
        let _: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(notice)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
