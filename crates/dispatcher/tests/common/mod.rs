#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cimm_core::config::{EngineConfig, RegistryConfig};
use cimm_core::models::{Destination, ModelKind};
use cimm_core::traits::{DestinationConnector, DestinationRegistry, StateStore, TaskNotifier};
use cimm_dispatcher::{ChunkStore, CompletionMonitor, Dispatcher, SubmissionService, TaskStore};
use cimm_infrastructure::{
    InMemoryDestinationHub, InMemoryStateStore, RedisTaskNotifier, StaticDestinationRegistry,
};
use cimm_testing_utils::{
    registry_of, DestinationBuilder, FakeWorker, ModelBuilder, WorkerBehavior,
};

pub const CHANNEL: &str = "done_jobs";
pub const OWNER: i64 = 42;

pub const PREPARER: i64 = 1;
pub const MOLECULE_MODEL: i64 = 2;
pub const REACTION_MODEL: i64 = 3;

pub fn engine_config(chunk_size: usize) -> EngineConfig {
    EngineConfig {
        chunk_size,
        poll_interval_ms: 10,
        lease_retry_attempts: 3,
        lease_retry_delay_ms: 5,
        completion_channel: CHANNEL.to_string(),
        ..Default::default()
    }
}

pub fn destination(id: i64, host: &str, queue: &str) -> Destination {
    DestinationBuilder::new()
        .with_id(id)
        .with_host(host)
        .with_queue(queue)
        .build()
}

/// 预处理模型两个节点 (prep-a, prep-b)，分子建模两个节点 (gpu-a, gpu-b)，
/// 反应建模与分子建模共用 gpu-a 端点
pub fn standard_registry() -> RegistryConfig {
    registry_of(vec![
        ModelBuilder::preparer(PREPARER)
            .with_name("preparer")
            .with_destination(destination(1, "prep-a", "prepare"))
            .with_destination(destination(2, "prep-b", "prepare"))
            .build(),
        ModelBuilder::new(MOLECULE_MODEL, ModelKind::MoleculeModeling)
            .with_name("logp")
            .with_destination(destination(3, "gpu-a", "logp"))
            .with_destination(destination(4, "gpu-b", "logp"))
            .build(),
        ModelBuilder::new(REACTION_MODEL, ModelKind::ReactionModeling)
            .with_name("rate")
            .with_destination(destination(5, "gpu-a", "rate"))
            .build(),
    ])
}

pub struct Harness {
    pub state: Arc<InMemoryStateStore>,
    pub hub: InMemoryDestinationHub,
    pub registry: Arc<dyn DestinationRegistry>,
    pub task_store: Arc<TaskStore>,
    pub chunk_store: Arc<ChunkStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub monitor: Arc<CompletionMonitor>,
    pub submission: SubmissionService,
    pub notifier: Arc<RedisTaskNotifier>,
    config: RegistryConfig,
}

impl Harness {
    pub fn new(registry: RegistryConfig, config: EngineConfig) -> Self {
        let state = Arc::new(InMemoryStateStore::new());
        let store: Arc<dyn StateStore> = state.clone();
        let hub = InMemoryDestinationHub::new();
        let connector: Arc<dyn DestinationConnector> = Arc::new(hub.clone());
        let registry_impl: Arc<dyn DestinationRegistry> =
            Arc::new(StaticDestinationRegistry::new(registry.clone()));

        let task_store = Arc::new(TaskStore::new(store.clone(), &config));
        let chunk_store = Arc::new(ChunkStore::new(
            store.clone(),
            config.chunk_size,
            config.task_ttl(),
        ));
        let notifier = Arc::new(RedisTaskNotifier::new(store.clone(), "task_ready:"));
        let notifier_dyn: Arc<dyn TaskNotifier> = notifier.clone();

        let dispatcher = Arc::new(Dispatcher::new(
            registry_impl.clone(),
            connector.clone(),
            task_store.clone(),
            config.clone(),
        ));
        let monitor = Arc::new(CompletionMonitor::new(
            registry_impl.clone(),
            connector,
            store,
            task_store.clone(),
            chunk_store.clone(),
            notifier_dyn.clone(),
            config,
        ));
        let submission = SubmissionService::new(
            registry_impl.clone(),
            dispatcher.clone(),
            task_store.clone(),
            chunk_store.clone(),
            notifier_dyn,
        );

        Self {
            state,
            hub,
            registry: registry_impl,
            task_store,
            chunk_store,
            dispatcher,
            monitor,
            submission,
            notifier,
            config: registry,
        }
    }

    /// 标准目录，并让监控器先订阅完成通道
    pub async fn start(chunk_size: usize) -> Self {
        let harness = Self::new(standard_registry(), engine_config(chunk_size));
        harness.monitor.sweep().await;
        harness
    }

    pub fn destination(&self, id: i64) -> Destination {
        self.config
            .models
            .iter()
            .flat_map(|m| m.destinations.iter())
            .find(|d| d.id == id)
            .cloned()
            .expect("destination in registry")
    }

    pub fn worker(&self, destination_id: i64, behavior: WorkerBehavior) -> FakeWorker {
        FakeWorker::new(
            Arc::new(self.hub.clone()),
            self.destination(destination_id),
            CHANNEL,
            behavior,
        )
    }

    /// 在所有目标节点上执行排队的作业
    pub async fn run_workers(&self, behavior: WorkerBehavior) -> usize {
        let mut done = 0;
        for destination in self.config.models.iter().flat_map(|m| m.destinations.iter()) {
            let worker = self.worker(destination.id, behavior.clone());
            done += worker.drain().await.expect("worker drain").len();
        }
        done
    }

    pub async fn published_to(&self, owner: i64) -> Vec<String> {
        self.state
            .published(&self.notifier.channel(owner))
            .await
            .into_iter()
            .map(|payload| String::from_utf8(payload).expect("utf8 task id"))
            .collect()
    }
}

pub async fn wait_until<F, Fut>(condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    cimm_testing_utils::TestEnv::wait_for(condition, Duration::from_secs(2)).await
}
