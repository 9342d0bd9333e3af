mod common;

use std::time::Duration;

use cimm_core::models::{CompletionNotice, ResultEntry, Task, TaskStatus, TaskType};
use cimm_core::traits::{DestinationRegistry, StateStore};
use cimm_core::{CimmError, FAILURE_KEY};
use cimm_dispatcher::{NoticeOutcome, TaskTarget};
use cimm_testing_utils::{molecules, WorkerBehavior};
use common::*;
use serde_json::json;

async fn processing_task(h: &Harness) -> String {
    let task = Task::new(
        uuid::Uuid::new_v4().to_string(),
        OWNER,
        TaskType::Modeling,
        TaskStatus::Processing,
    );
    h.task_store.insert(&task).await.unwrap();
    task.id
}

#[tokio::test]
async fn test_prepare_round_trip() {
    let h = Harness::start(50).await;
    h.hub.set_backlog(&h.destination(1), 1).await;

    let meta = h
        .submission
        .create_task(OWNER, TaskType::Modeling, molecules(3))
        .await
        .unwrap();
    assert_eq!(meta.status, TaskStatus::Preparing);
    assert_eq!(meta.total, 0);

    let done = h.worker(2, WorkerBehavior::Prepare).drain().await.unwrap();
    assert_eq!(done.len(), 1);

    let stats = h.monitor.sweep().await;
    assert_eq!(stats.merged, 1);

    let task = h.task_store.read(&meta.task).await.unwrap();
    assert_eq!(task.status, TaskStatus::Prepared);
    assert!(task.jobs.is_empty());
    assert_eq!(task.page_count(), 1);

    let page = h
        .submission
        .fetch(OWNER, &meta.task, TaskStatus::Prepared, Some(1))
        .await
        .unwrap();
    let ids: Vec<u32> = page.structures.iter().map(|s| s.structure).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(page.meta.total, 3);
    assert_eq!(page.meta.pages, 1);
    assert_eq!(page.meta.page_size, 50);
    assert_eq!(h.published_to(OWNER).await, vec![meta.task.clone()]);
    assert!(h.hub.job_ids(&h.destination(2).endpoint()).await.is_empty());
}

#[tokio::test]
async fn test_partial_chunk_is_last_page() {
    let h = Harness::start(2).await;
    let task_id = h
        .task_store
        .create(OWNER, TaskType::Modeling, vec![])
        .await
        .unwrap();
    let preparer = h.registry.get_model(PREPARER).await.unwrap().unwrap();
    for batch in [vec![1, 2], vec![3, 4, 5]] {
        let structures = molecules(5)
            .into_iter()
            .filter(|s| batch.contains(&s.structure))
            .collect();
        h.dispatcher
            .enqueue(&preparer, structures, TaskTarget::Existing(&task_id))
            .await
            .unwrap();
    }

    assert_eq!(h.run_workers(WorkerBehavior::Prepare).await, 2);
    h.monitor.sweep().await;

    let meta = h
        .submission
        .fetch_meta(OWNER, &task_id, TaskStatus::Prepared)
        .await
        .unwrap();
    assert_eq!(meta.total, 5);
    assert_eq!(meta.pages, 3);
    assert_eq!(meta.page_size, 2);

    for page in 1..=2 {
        let full = h
            .submission
            .fetch(OWNER, &task_id, TaskStatus::Prepared, Some(page))
            .await
            .unwrap();
        assert_eq!(full.structures.len(), 2);
    }
    let last = h
        .submission
        .fetch(OWNER, &task_id, TaskStatus::Prepared, Some(3))
        .await
        .unwrap();
    assert_eq!(last.structures.len(), 1);

    let err = h
        .submission
        .fetch(OWNER, &task_id, TaskStatus::Prepared, Some(4))
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::PageNotFound { page: 4, pages: 3 }));

    let all = h
        .submission
        .fetch(OWNER, &task_id, TaskStatus::Prepared, None)
        .await
        .unwrap();
    let ids: Vec<u32> = all.structures.iter().map(|s| s.structure).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_duplicate_notice_is_ignored() {
    let h = Harness::start(50).await;
    let meta = h
        .submission
        .create_task(OWNER, TaskType::Modeling, molecules(2))
        .await
        .unwrap();
    let job = h
        .worker(1, WorkerBehavior::Prepare)
        .run_once()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.monitor.sweep().await.merged, 1);

    let notice = CompletionNotice::for_job(&job);
    let endpoint = h.destination(1).endpoint();
    h.hub.publish(&endpoint, CHANNEL, notice.clone()).await;
    let stats = h.monitor.sweep().await;
    assert_eq!(stats.notices, 1);
    assert_eq!(stats.merged, 0);

    let outcome = h.monitor.handle_notice(&endpoint, &notice).await.unwrap();
    assert_eq!(outcome, NoticeOutcome::Duplicate);

    let page = h
        .submission
        .fetch(OWNER, &meta.task, TaskStatus::Prepared, None)
        .await
        .unwrap();
    assert!(page.structures.iter().all(|s| s.models.len() == 1));
    assert_eq!(h.published_to(OWNER).await.len(), 1);
}

#[tokio::test]
async fn test_failed_job_becomes_failure_results() {
    let h = Harness::start(50).await;
    let meta = h
        .submission
        .create_task(OWNER, TaskType::Modeling, molecules(3))
        .await
        .unwrap();
    h.worker(1, WorkerBehavior::Fail("worker crashed".to_string()))
        .drain()
        .await
        .unwrap();
    h.monitor.sweep().await;

    let page = h
        .submission
        .fetch(OWNER, &meta.task, TaskStatus::Prepared, Some(1))
        .await
        .unwrap();
    assert_eq!(page.structures.len(), 3);
    for structure in &page.structures {
        let block = &structure.models[0];
        assert_eq!(block.model, PREPARER);
        assert_eq!(block.results[0].key, FAILURE_KEY);
        assert_eq!(block.results[0].value, json!("Model not working"));
    }
}

#[tokio::test]
async fn test_contract_violation_converges_with_failure() {
    let h = Harness::start(50).await;
    let task_id = processing_task(&h).await;
    let model = h.registry.get_model(MOLECULE_MODEL).await.unwrap().unwrap();
    h.dispatcher
        .enqueue(&model, molecules(3), TaskTarget::Existing(&task_id))
        .await
        .unwrap();

    let lossy = WorkerBehavior::custom(|input| input[..2].to_vec());
    h.worker(3, lossy).drain().await.unwrap();
    h.monitor.sweep().await;

    let page = h
        .submission
        .fetch(OWNER, &task_id, TaskStatus::Processed, None)
        .await
        .unwrap();
    assert_eq!(page.structures.len(), 3);
    assert!(page
        .structures
        .iter()
        .all(|s| s.models[0].results[0].value == json!("Model lost data")));
}

#[tokio::test]
async fn test_reordered_worker_output_is_merged() {
    let h = Harness::start(50).await;
    let task_id = processing_task(&h).await;
    let model = h.registry.get_model(MOLECULE_MODEL).await.unwrap().unwrap();
    h.dispatcher
        .enqueue(&model, molecules(3), TaskTarget::Existing(&task_id))
        .await
        .unwrap();

    let reversed = WorkerBehavior::custom(|input| {
        input
            .iter()
            .rev()
            .cloned()
            .map(|mut s| {
                s.results = vec![ResultEntry::text("logp", s.structure.to_string())];
                s
            })
            .collect()
    });
    h.worker(3, reversed).drain().await.unwrap();
    assert_eq!(h.monitor.sweep().await.merged, 1);

    let page = h
        .submission
        .fetch(OWNER, &task_id, TaskStatus::Processed, None)
        .await
        .unwrap();
    let ids: Vec<u32> = page.structures.iter().map(|s| s.structure).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    for structure in &page.structures {
        let entry = &structure.models[0].results[0];
        assert_eq!(entry.key, "logp");
        assert_eq!(entry.value, json!(structure.structure.to_string()));
    }
}

#[tokio::test]
async fn test_results_merge_in_any_order() {
    let h = Harness::start(50).await;
    let task_id = processing_task(&h).await;
    let model = h.registry.get_model(MOLECULE_MODEL).await.unwrap().unwrap();
    h.dispatcher
        .enqueue(&model, molecules(2), TaskTarget::Existing(&task_id))
        .await
        .unwrap();
    h.dispatcher
        .enqueue(&model, molecules(2), TaskTarget::Existing(&task_id))
        .await
        .unwrap();

    // 第二个作业先完成
    h.worker(4, WorkerBehavior::Annotate("logp".to_string()))
        .drain()
        .await
        .unwrap();
    h.monitor.sweep().await;
    let task = h.task_store.read(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.jobs.len(), 1);

    h.worker(3, WorkerBehavior::Echo).drain().await.unwrap();
    h.monitor.sweep().await;

    let page = h
        .submission
        .fetch(OWNER, &task_id, TaskStatus::Processed, None)
        .await
        .unwrap();
    for structure in &page.structures {
        assert_eq!(structure.models.len(), 2);
        assert_eq!(structure.models[0].results[0].key, "logp");
        assert!(structure.models[1].results.is_empty());
    }
}

#[tokio::test]
async fn test_failing_endpoint_does_not_block_others() {
    let h = Harness::start(50).await;
    h.hub.set_backlog(&h.destination(2), 5).await;
    let meta = h
        .submission
        .create_task(OWNER, TaskType::Modeling, molecules(1))
        .await
        .unwrap();
    h.worker(1, WorkerBehavior::Prepare).drain().await.unwrap();

    let prep_b = h.destination(2).endpoint();
    h.hub.set_reachable(&prep_b, false).await;
    let stats = h.monitor.sweep().await;
    assert_eq!(stats.failed_endpoints, 1);
    assert_eq!(stats.merged, 1);

    let task = h.task_store.read(&meta.task).await.unwrap();
    assert_eq!(task.status, TaskStatus::Prepared);

    assert_eq!(h.monitor.sweep().await.endpoints, 3);
    h.hub.set_reachable(&prep_b, true).await;
    assert_eq!(h.monitor.sweep().await.endpoints, 4);
}

#[tokio::test]
async fn test_restarted_endpoint_reconnects_on_next_sweep() {
    let h = Harness::start(50).await;
    h.hub.set_backlog(&h.destination(2), 5).await;
    let meta = h
        .submission
        .create_task(OWNER, TaskType::Modeling, molecules(2))
        .await
        .unwrap();
    h.worker(1, WorkerBehavior::Prepare).drain().await.unwrap();

    h.hub
        .break_cached_connection(&h.destination(1).endpoint())
        .await;
    let stats = h.monitor.sweep().await;
    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.merged, 0);

    let stats = h.monitor.sweep().await;
    assert_eq!(stats.deferred, 0);
    assert_eq!(stats.merged, 1);

    let task = h.task_store.read(&meta.task).await.unwrap();
    assert_eq!(task.status, TaskStatus::Prepared);
    assert!(h.hub.job_ids(&h.destination(1).endpoint()).await.is_empty());
}

#[tokio::test]
async fn test_held_lease_defers_notice() {
    let h = Harness::start(50).await;
    let meta = h
        .submission
        .create_task(OWNER, TaskType::Modeling, molecules(2))
        .await
        .unwrap();
    h.worker(1, WorkerBehavior::Prepare).drain().await.unwrap();

    let lease = format!("lease:{}", meta.task);
    assert!(h
        .state
        .try_lock(&lease, "other-writer", Duration::from_secs(10))
        .await
        .unwrap());

    let stats = h.monitor.sweep().await;
    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.merged, 0);

    assert!(h.state.unlock(&lease, "other-writer").await.unwrap());
    let stats = h.monitor.sweep().await;
    assert_eq!(stats.merged, 1);

    let task = h.task_store.read(&meta.task).await.unwrap();
    assert_eq!(task.status, TaskStatus::Prepared);
}

#[tokio::test]
async fn test_result_for_deleted_task_is_dropped() {
    let h = Harness::start(50).await;
    let meta = h
        .submission
        .create_task(OWNER, TaskType::Modeling, molecules(2))
        .await
        .unwrap();
    h.worker(1, WorkerBehavior::Prepare).drain().await.unwrap();
    h.submission.delete_task(OWNER, &meta.task).await.unwrap();

    let stats = h.monitor.sweep().await;
    assert_eq!(stats.notices, 1);
    assert_eq!(stats.merged, 0);
    assert!(h.hub.job_ids(&h.destination(1).endpoint()).await.is_empty());
    assert!(h.published_to(OWNER).await.is_empty());
}

#[tokio::test]
async fn test_notice_for_missing_job() {
    let h = Harness::start(50).await;
    let notice = CompletionNotice {
        queue: "prepare".to_string(),
        job_id: "gone".to_string(),
    };
    let outcome = h
        .monitor
        .handle_notice(&h.destination(1).endpoint(), &notice)
        .await
        .unwrap();
    assert_eq!(outcome, NoticeOutcome::JobMissing);
}

#[tokio::test]
async fn test_run_until_stopped() {
    let h = Harness::start(50).await;
    let monitor = h.monitor.clone();
    let handle = tokio::spawn(async move { monitor.run().await });

    let h_ref = &h;
    assert!(wait_until(move || async move { h_ref.monitor.is_running().await }).await);

    let meta = h
        .submission
        .create_task(OWNER, TaskType::Modeling, molecules(2))
        .await
        .unwrap();
    h.worker(1, WorkerBehavior::Prepare).drain().await.unwrap();

    let task_id = meta.task.clone();
    assert!(
        wait_until(move || {
            let task_id = task_id.clone();
            async move {
                h_ref
                    .task_store
                    .read(&task_id)
                    .await
                    .map(|t| t.status == TaskStatus::Prepared)
                    .unwrap_or(false)
            }
        })
        .await
    );

    h.monitor.stop().await;
    handle.await.unwrap().unwrap();
    assert!(!h.monitor.is_running().await);
}
