use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use cimm_core::models::{CompletionNotice, Destination, EndpointKey, Job, JobStatus};
use cimm_core::traits::{CompletionChannel, DestinationConnector, JobQueue};
use cimm_core::{CimmError, CimmResult};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Default)]
struct EndpointState {
    unreachable: bool,
    reject_enqueue: bool,
    /// 缓存连接已失效，直到 `invalidate` 才恢复
    stale_cache: bool,
    queues: HashMap<String, VecDeque<String>>,
    /// 模拟其他任务占用的排队长度
    backlog: HashMap<String, usize>,
    jobs: HashMap<String, Job>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<CompletionNotice>>>,
}

impl EndpointState {
    fn publish(&mut self, channel: &str, notice: &CompletionNotice) {
        if let Some(senders) = self.subscribers.get_mut(channel) {
            senders.retain(|tx| tx.send(notice.clone()).is_ok());
        }
    }
}

type Endpoints = Arc<Mutex<HashMap<EndpointKey, EndpointState>>>;

fn unreachable(endpoint: &EndpointKey) -> CimmError {
    CimmError::StateStore(format!("端点 {endpoint} 不可达"))
}

/// 内存中的目标节点集合
///
/// 每个端点持有若干队列、作业记录和完成通道订阅者。
/// 测试可以切换端点可达性、注入排队长度，或直接在完成通道上发布通知。
#[derive(Clone, Default)]
pub struct InMemoryDestinationHub {
    endpoints: Endpoints,
}

impl InMemoryDestinationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_reachable(&self, endpoint: &EndpointKey, reachable: bool) {
        let mut endpoints = self.endpoints.lock().await;
        endpoints.entry(endpoint.clone()).or_default().unreachable = !reachable;
    }

    /// 探活成功但提交作业失败，模拟探测之后才掉线的节点
    pub async fn set_reject_enqueue(&self, endpoint: &EndpointKey, reject: bool) {
        let mut endpoints = self.endpoints.lock().await;
        endpoints.entry(endpoint.clone()).or_default().reject_enqueue = reject;
    }

    /// 模拟端点重启: 缓存的连接失效，新建连接和订阅不受影响
    pub async fn break_cached_connection(&self, endpoint: &EndpointKey) {
        let mut endpoints = self.endpoints.lock().await;
        endpoints.entry(endpoint.clone()).or_default().stale_cache = true;
    }

    pub async fn set_backlog(&self, destination: &Destination, backlog: usize) {
        let mut endpoints = self.endpoints.lock().await;
        endpoints
            .entry(destination.endpoint())
            .or_default()
            .backlog
            .insert(destination.queue_name.clone(), backlog);
    }

    /// 直接在端点的完成通道上发布通知
    pub async fn publish(&self, endpoint: &EndpointKey, channel: &str, notice: CompletionNotice) {
        let mut endpoints = self.endpoints.lock().await;
        endpoints
            .entry(endpoint.clone())
            .or_default()
            .publish(channel, &notice);
    }

    /// 端点上所有作业ID，含已完成未删除的
    pub async fn job_ids(&self, endpoint: &EndpointKey) -> Vec<String> {
        let endpoints = self.endpoints.lock().await;
        let mut ids: Vec<String> = endpoints
            .get(endpoint)
            .map(|s| s.jobs.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn job_queue(&self, endpoint: EndpointKey, name: &str, cached: bool) -> Arc<dyn JobQueue> {
        Arc::new(InMemoryJobQueue {
            endpoints: self.endpoints.clone(),
            endpoint,
            name: name.to_string(),
            cached,
        })
    }
}

#[async_trait]
impl DestinationConnector for InMemoryDestinationHub {
    async fn connect(&self, destination: &Destination) -> CimmResult<Arc<dyn JobQueue>> {
        let endpoint = destination.endpoint();
        {
            let mut endpoints = self.endpoints.lock().await;
            if endpoints.entry(endpoint.clone()).or_default().unreachable {
                return Err(unreachable(&endpoint));
            }
        }
        Ok(self.job_queue(endpoint, &destination.queue_name, false))
    }

    async fn queue(
        &self,
        endpoint: &EndpointKey,
        queue_name: &str,
    ) -> CimmResult<Arc<dyn JobQueue>> {
        Ok(self.job_queue(endpoint.clone(), queue_name, true))
    }

    async fn invalidate(&self, endpoint: &EndpointKey) {
        if let Some(state) = self.endpoints.lock().await.get_mut(endpoint) {
            state.stale_cache = false;
        }
    }

    async fn subscribe(
        &self,
        endpoint: &EndpointKey,
        channel: &str,
    ) -> CimmResult<Box<dyn CompletionChannel>> {
        let mut endpoints = self.endpoints.lock().await;
        let state = endpoints.entry(endpoint.clone()).or_default();
        if state.unreachable {
            return Err(unreachable(endpoint));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        debug!("订阅端点 {} 的完成通道 {}", endpoint, channel);
        Ok(Box::new(InMemoryCompletionChannel {
            endpoints: self.endpoints.clone(),
            endpoint: endpoint.clone(),
            receiver: rx,
        }))
    }
}

/// 内存作业队列
pub struct InMemoryJobQueue {
    endpoints: Endpoints,
    endpoint: EndpointKey,
    name: String,
    cached: bool,
}

impl InMemoryJobQueue {
    async fn with_state<T>(
        &self,
        f: impl FnOnce(&mut EndpointState) -> CimmResult<T> + Send,
    ) -> CimmResult<T> {
        let mut endpoints = self.endpoints.lock().await;
        let state = endpoints.entry(self.endpoint.clone()).or_default();
        if state.unreachable || (self.cached && state.stale_cache) {
            return Err(unreachable(&self.endpoint));
        }
        f(state)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, job: &Job) -> CimmResult<()> {
        let endpoint = self.endpoint.clone();
        self.with_state(|state| {
            if state.reject_enqueue {
                return Err(unreachable(&endpoint));
            }
            state.jobs.insert(job.id.clone(), job.clone());
            state
                .queues
                .entry(self.name.clone())
                .or_default()
                .push_back(job.id.clone());
            Ok(())
        })
        .await
    }

    async fn fetch_job(&self, job_id: &str) -> CimmResult<Option<Job>> {
        self.with_state(|state| Ok(state.jobs.get(job_id).cloned()))
            .await
    }

    async fn delete_job(&self, job_id: &str) -> CimmResult<()> {
        self.with_state(|state| {
            state.jobs.remove(job_id);
            if let Some(queue) = state.queues.get_mut(&self.name) {
                queue.retain(|id| id != job_id);
            }
            Ok(())
        })
        .await
    }

    async fn len(&self) -> CimmResult<usize> {
        self.with_state(|state| {
            let queued = state.queues.get(&self.name).map_or(0, VecDeque::len);
            let backlog = state.backlog.get(&self.name).copied().unwrap_or(0);
            Ok(queued + backlog)
        })
        .await
    }

    async fn take_next(&self) -> CimmResult<Option<Job>> {
        self.with_state(|state| {
            while let Some(job_id) = state
                .queues
                .get_mut(&self.name)
                .and_then(VecDeque::pop_front)
            {
                if let Some(job) = state.jobs.get_mut(&job_id) {
                    job.status = JobStatus::Started;
                    return Ok(Some(job.clone()));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn complete(&self, job: &Job, channel: &str) -> CimmResult<()> {
        self.with_state(|state| {
            state.jobs.insert(job.id.clone(), job.clone());
            state.publish(channel, &CompletionNotice::for_job(job));
            Ok(())
        })
        .await
    }
}

/// 内存完成通道
pub struct InMemoryCompletionChannel {
    endpoints: Endpoints,
    endpoint: EndpointKey,
    receiver: mpsc::UnboundedReceiver<CompletionNotice>,
}

#[async_trait]
impl CompletionChannel for InMemoryCompletionChannel {
    async fn try_next(&mut self) -> CimmResult<Option<CompletionNotice>> {
        {
            let endpoints = self.endpoints.lock().await;
            if endpoints.get(&self.endpoint).is_some_and(|s| s.unreachable) {
                return Err(unreachable(&self.endpoint));
            }
        }
        match self.receiver.try_recv() {
            Ok(notice) => Ok(Some(notice)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(CimmError::StateStore(format!(
                "端点 {} 的完成通道已关闭",
                self.endpoint
            ))),
        }
    }
}
