use std::sync::Arc;
use std::time::Duration;

use cimm::app::{AppMode, Application, Engine};
use cimm::shutdown::ShutdownManager;
use cimm_core::config::{AppConfig, NotifierKind};
use cimm_core::models::{TaskStatus, TaskType};
use cimm_core::traits::{DestinationConnector, StateStore};
use cimm_infrastructure::{InMemoryDestinationHub, InMemoryStateStore};
use cimm_testing_utils::{molecules, FakeWorker, TestEnv, WorkerBehavior};

const SAMPLE_CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/cimm.toml");

fn sample_config() -> AppConfig {
    let mut config = AppConfig::load(Some(SAMPLE_CONFIG)).unwrap();
    config.engine.poll_interval_ms = 10;
    config
}

#[test]
fn test_sample_config_is_valid() {
    let config = AppConfig::load(Some(SAMPLE_CONFIG)).unwrap();
    assert_eq!(config.notifier.kind, NotifierKind::Redis);
    assert_eq!(config.registry.models.len(), 3);
    assert_eq!(config.engine.completion_channel, "done_jobs");
}

#[tokio::test]
async fn test_monitor_mode_runs_until_shutdown() {
    let config = sample_config();
    let state = Arc::new(InMemoryStateStore::new());
    let hub = InMemoryDestinationHub::new();
    let connector: Arc<dyn DestinationConnector> = Arc::new(hub.clone());
    let store: Arc<dyn StateStore> = state.clone();

    let engine = Engine::assemble(&config, store, connector.clone()).unwrap();
    let app = Arc::new(Application::with_engine(engine, AppMode::Monitor));
    let shutdown = ShutdownManager::new();

    let handle = {
        let app = Arc::clone(&app);
        let rx = shutdown.subscribe().await;
        tokio::spawn(async move { app.run(rx).await })
    };

    let monitor = app.engine().monitor.clone();
    assert!(
        TestEnv::wait_for(
            || {
                let monitor = monitor.clone();
                async move { monitor.is_running().await }
            },
            Duration::from_secs(2),
        )
        .await
    );
    // 等待首轮订阅完成
    tokio::time::sleep(Duration::from_millis(50)).await;

    let meta = app
        .engine()
        .submission
        .create_task(7, TaskType::Modeling, molecules(3))
        .await
        .unwrap();

    let preparer = config.registry.models[0].destinations[0].clone();
    FakeWorker::new(connector, preparer, "done_jobs", WorkerBehavior::Prepare)
        .drain()
        .await
        .unwrap();

    let task_store = app.engine().task_store.clone();
    let task_id = meta.task.clone();
    assert!(
        TestEnv::wait_for(
            || {
                let task_store = task_store.clone();
                let task_id = task_id.clone();
                async move {
                    task_store
                        .read(&task_id)
                        .await
                        .map(|t| t.status == TaskStatus::Prepared)
                        .unwrap_or(false)
                }
            },
            Duration::from_secs(2),
        )
        .await
    );
    assert_eq!(
        state.published("task_ready:7").await,
        vec![meta.task.as_bytes().to_vec()]
    );

    shutdown.shutdown().await;
    handle.await.unwrap().unwrap();
    assert!(!monitor.is_running().await);
}

#[tokio::test]
async fn test_probe_mode_completes() {
    let config = sample_config();
    let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let connector: Arc<dyn DestinationConnector> = Arc::new(InMemoryDestinationHub::new());
    let engine = Engine::assemble(&config, state, connector).unwrap();
    let app = Application::with_engine(engine, AppMode::Probe);

    let rx = ShutdownManager::new().subscribe().await;
    app.run(rx).await.unwrap();
}
