use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cimm_core::models::{Destination, Job, JobMeta, StructureDocument};
use cimm_core::traits::{DestinationConnector, StateStore, StateStoreExt};
use cimm_infrastructure::{RedisConnectionManager, RedisDestinationConnector, RedisStateStore};
use cimm_testing_utils::{DestinationBuilder, RedisTestContainer};
use serde_json::json;

fn destination(port: u16) -> Destination {
    DestinationBuilder::new().with_port(port).with_queue("logp").build()
}

#[tokio::test]
#[ignore] // 需要Docker
async fn test_state_store_lease_and_ttl() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let manager = RedisConnectionManager::new(redis.endpoint_config()).await?;
    let store: Arc<dyn StateStore> = Arc::new(RedisStateStore::new(manager));

    store
        .set_json("task-1", &json!({"status": "PREPARING"}), Duration::from_millis(300))
        .await?;
    let value: Option<serde_json::Value> = store.get_json("task-1").await?;
    assert_eq!(value, Some(json!({"status": "PREPARING"})));

    assert!(store.expire("task-1", Duration::from_millis(300)).await?);
    assert!(!store.expire("task-missing", Duration::from_millis(300)).await?);

    assert!(store.try_lock("lease:task-1", "a", Duration::from_secs(5)).await?);
    assert!(!store.try_lock("lease:task-1", "b", Duration::from_secs(5)).await?);
    assert!(!store.unlock("lease:task-1", "b").await?);
    assert!(store.unlock("lease:task-1", "a").await?);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let expired: Option<serde_json::Value> = store.get_json("task-1").await?;
    assert!(expired.is_none());
    Ok(())
}

#[tokio::test]
#[ignore] // 需要Docker
async fn test_job_queue_and_completion_channel() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let connector = RedisDestinationConnector::new(Duration::from_secs(5));
    let dest = destination(redis.port);

    let mut channel = connector.subscribe(&dest.endpoint(), "done_jobs").await?;
    assert!(channel.try_next().await?.is_none());

    let queue = connector.connect(&dest).await?;
    let job = Job::new(
        "logp",
        "logp",
        vec![StructureDocument::new(1, json!("CCO"))],
        JobMeta {
            task: "task-1".to_string(),
            model: 1,
            destination: 1,
        },
        60,
        60,
    );
    queue.enqueue(&job).await?;
    assert_eq!(connector.queue_length(&dest).await?, 1);

    let mut taken = queue.take_next().await?.expect("queued job");
    assert_eq!(queue.len().await?, 0);
    taken.finish(taken.structures.clone());
    queue.complete(&taken, "done_jobs").await?;

    let mut notice = None;
    for _ in 0..50 {
        notice = channel.try_next().await?;
        if notice.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let notice = notice.expect("completion notice");
    assert_eq!(notice.job_id, job.id);

    let stored = queue.fetch_job(&job.id).await?.expect("finished job");
    assert!(stored.is_finished());
    queue.delete_job(&job.id).await?;
    assert!(queue.fetch_job(&job.id).await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore] // 需要Docker
async fn test_dropped_connection_recovers_after_invalidate() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let connector = RedisDestinationConnector::new(Duration::from_secs(5));
    let dest = destination(redis.port);
    let endpoint = dest.endpoint();

    let queue = connector.queue(&endpoint, "logp").await?;
    assert_eq!(queue.len().await?, 0);

    // 断开服务端所有普通客户端，模拟Redis重启
    let admin = redis::Client::open(endpoint.connection_url())?;
    let mut admin = admin.get_multiplexed_async_connection().await?;
    let _: i64 = redis::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("normal")
        .query_async(&mut admin)
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stale = connector.queue(&endpoint, "logp").await?;
    assert!(stale.len().await.unwrap_err().is_connectivity());

    connector.invalidate(&endpoint).await;
    let fresh = connector.queue(&endpoint, "logp").await?;
    assert_eq!(fresh.len().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_destination_is_connectivity_error() {
    let connector = RedisDestinationConnector::new(Duration::from_millis(200));
    let err = connector.connect(&destination(1)).await.err().unwrap();
    assert!(err.is_connectivity());
}
