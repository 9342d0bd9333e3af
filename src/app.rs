use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cimm_core::config::AppConfig;
use cimm_core::traits::{DestinationConnector, DestinationRegistry, StateStore, TaskNotifier};
use cimm_dispatcher::{ChunkStore, CompletionMonitor, Dispatcher, SubmissionService, TaskStore};
use cimm_infrastructure::{
    build_notifier, RedisConnectionManager, RedisDestinationConnector, RedisStateStore,
    StaticDestinationRegistry,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 持续运行完成监控器
    Monitor,
    /// 探测所有模型的目标节点后退出
    Probe,
}

/// 装配好的引擎组件
pub struct Engine {
    pub registry: Arc<dyn DestinationRegistry>,
    pub task_store: Arc<TaskStore>,
    pub chunk_store: Arc<ChunkStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub monitor: Arc<CompletionMonitor>,
    pub submission: Arc<SubmissionService>,
}

impl Engine {
    /// 用给定的主存储和目标节点连接器装配引擎
    pub fn assemble(
        config: &AppConfig,
        state: Arc<dyn StateStore>,
        connector: Arc<dyn DestinationConnector>,
    ) -> Result<Self> {
        let registry: Arc<dyn DestinationRegistry> =
            Arc::new(StaticDestinationRegistry::new(config.registry.clone()));
        let notifier: Arc<dyn TaskNotifier> =
            build_notifier(&config.notifier, state.clone()).context("创建任务推送失败")?;

        let engine = &config.engine;
        let task_store = Arc::new(TaskStore::new(state.clone(), engine));
        let chunk_store = Arc::new(ChunkStore::new(
            state.clone(),
            engine.chunk_size,
            engine.task_ttl(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            connector.clone(),
            task_store.clone(),
            engine.clone(),
        ));
        let monitor = Arc::new(CompletionMonitor::new(
            registry.clone(),
            connector,
            state,
            task_store.clone(),
            chunk_store.clone(),
            notifier.clone(),
            engine.clone(),
        ));
        let submission = Arc::new(SubmissionService::new(
            registry.clone(),
            dispatcher.clone(),
            task_store.clone(),
            chunk_store.clone(),
            notifier,
        ));

        Ok(Self {
            registry,
            task_store,
            chunk_store,
            dispatcher,
            monitor,
            submission,
        })
    }

    /// 连接Redis主存储并装配引擎
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.primary.clone())
            .await
            .context("连接主存储失败")?;
        let state: Arc<dyn StateStore> = Arc::new(RedisStateStore::new(manager));
        let connector: Arc<dyn DestinationConnector> = Arc::new(RedisDestinationConnector::new(
            Duration::from_secs(config.primary.connection_timeout_seconds),
        ));
        Self::assemble(config, state, connector)
    }
}

/// 主应用程序
pub struct Application {
    mode: AppMode,
    engine: Engine,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);
        let engine = Engine::connect(&config).await?;
        Ok(Self::with_engine(engine, mode))
    }

    pub fn with_engine(engine: Engine, mode: AppMode) -> Self {
        Self { mode, engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match self.mode {
            AppMode::Monitor => self.run_monitor(shutdown_rx).await,
            AppMode::Probe => self.run_probe().await,
        }
    }

    /// 运行完成监控器直到收到关闭信号
    async fn run_monitor(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        info!("在 {} 上启动完成监控器", host);

        let monitor_handle = {
            let monitor = Arc::clone(&self.engine.monitor);
            tokio::spawn(async move {
                if let Err(e) = monitor.run().await {
                    error!("完成监控器异常退出: {e}");
                }
            })
        };

        let _ = shutdown_rx.recv().await;
        info!("完成监控器收到关闭信号");
        self.engine.monitor.stop().await;

        if let Err(e) = monitor_handle.await {
            error!("等待完成监控器退出失败: {e}");
        }
        info!("完成监控器已停止");
        Ok(())
    }

    /// 打印每个模型的可达目标节点及排队长度
    async fn run_probe(&self) -> Result<()> {
        let models = self.engine.registry.list_models().await?;
        for model in models {
            let candidates = self.engine.dispatcher.probe(model.id).await?;
            if candidates.is_empty() {
                warn!("模型 {} ({}) 没有可达的目标节点", model.id, model.name);
                continue;
            }
            for candidate in candidates {
                info!(
                    "模型 {} ({}) -> 目标节点 {} [{}/{}] 排队长度: {}",
                    model.id,
                    model.name,
                    candidate.destination.id,
                    candidate.destination.endpoint(),
                    candidate.destination.queue_name,
                    candidate.queue_length
                );
            }
        }
        Ok(())
    }
}
