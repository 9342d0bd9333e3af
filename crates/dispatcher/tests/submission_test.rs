mod common;

use cimm_core::models::{StructureStatus, StructureUpdate, TaskStatus, TaskType};
use cimm_core::CimmError;
use cimm_testing_utils::{molecules, StructureBuilder, WorkerBehavior};
use common::*;

fn update(structure: u32, models: Vec<i64>) -> StructureUpdate {
    StructureUpdate {
        structure,
        models,
        ..Default::default()
    }
}

/// 已准备好的任务: 1、2为干净分子，3未清洗，4为干净反应
async fn prepared_task(h: &Harness) -> String {
    let structures = vec![
        StructureBuilder::new(1).clean().build(),
        StructureBuilder::new(2).clean().build(),
        StructureBuilder::new(3).build(),
        StructureBuilder::new(4).clean().reaction().build(),
    ];
    h.submission
        .create_prepared_task(OWNER, TaskType::Modeling, structures)
        .await
        .unwrap()
        .task
}

#[tokio::test]
async fn test_create_task_rejects_empty_batch() {
    let h = Harness::start(50).await;
    let err = h
        .submission
        .create_task(OWNER, TaskType::Modeling, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::InvalidInput(_)));
}

#[tokio::test]
async fn test_create_task_renumbers_and_truncates_search() {
    let h = Harness::start(50).await;
    let structures = vec![
        StructureBuilder::new(17).build(),
        StructureBuilder::new(3).build(),
    ];
    h.submission
        .create_task(OWNER, TaskType::Searching, structures)
        .await
        .unwrap();

    let job = h
        .worker(1, WorkerBehavior::Echo)
        .run_once()
        .await
        .unwrap()
        .unwrap();
    let ids: Vec<u32> = job.structures.iter().map(|s| s.structure).collect();
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn test_fetch_checks_owner_and_readiness() {
    let h = Harness::start(50).await;
    let meta = h
        .submission
        .create_task(OWNER, TaskType::Modeling, molecules(2))
        .await
        .unwrap();

    let err = h
        .submission
        .fetch(OWNER, &meta.task, TaskStatus::Prepared, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::InvalidTaskState { ref message, .. } if message == "任务尚未就绪"));

    let err = h
        .submission
        .fetch(OWNER + 1, &meta.task, TaskStatus::Prepared, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::AccessDenied { user, .. } if user == OWNER + 1));

    let err = h
        .submission
        .fetch(OWNER, &meta.task, TaskStatus::Processed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::InvalidTaskState { .. }));

    let err = h
        .submission
        .fetch_meta(OWNER, "no-such-task", TaskStatus::Prepared)
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::TaskNotFound { .. }));
}

#[tokio::test]
async fn test_prepared_task_is_immediately_readable() {
    let h = Harness::start(3).await;
    let meta = h
        .submission
        .create_prepared_task(OWNER, TaskType::Modeling, molecules(7))
        .await
        .unwrap();
    assert_eq!(meta.status, TaskStatus::Prepared);
    assert_eq!(meta.total, 7);
    assert_eq!(meta.pages, 3);

    let last = h
        .submission
        .fetch(OWNER, &meta.task, TaskStatus::Prepared, Some(3))
        .await
        .unwrap();
    assert_eq!(last.structures.len(), 1);
    assert_eq!(last.structures[0].structure, 7);
}

#[tokio::test]
async fn test_process_groups_structures_by_model() {
    let h = Harness::start(50).await;
    let prepared = prepared_task(&h).await;

    let mut first = update(1, vec![MOLECULE_MODEL, REACTION_MODEL]);
    first.temperature = Some(310.0);
    let updates = vec![
        first,
        update(2, vec![MOLECULE_MODEL]),
        update(3, vec![MOLECULE_MODEL]),
        update(4, vec![MOLECULE_MODEL, REACTION_MODEL]),
    ];
    let meta = h
        .submission
        .process_task(OWNER, &prepared, updates)
        .await
        .unwrap();
    assert_ne!(meta.task, prepared);
    assert_eq!(meta.status, TaskStatus::Processing);

    let task = h.task_store.read(&meta.task).await.unwrap();
    assert_eq!(task.jobs.len(), 2);
    assert!(!task.dispatching);

    let done = h
        .run_workers(WorkerBehavior::Annotate("value".to_string()))
        .await;
    assert_eq!(done, 2);
    h.monitor.sweep().await;

    let page = h
        .submission
        .fetch(OWNER, &meta.task, TaskStatus::Processed, None)
        .await
        .unwrap();
    let ids: Vec<u32> = page.structures.iter().map(|s| s.structure).collect();
    assert_eq!(ids, vec![1, 2, 4]);

    let first = &page.structures[0];
    assert_eq!(first.temperature, Some(310.0));
    assert_eq!(first.models.len(), 1);
    assert_eq!(first.models[0].model, MOLECULE_MODEL);
    assert_eq!(page.structures[2].models[0].model, REACTION_MODEL);
    assert!(page
        .structures
        .iter()
        .all(|s| s.status == StructureStatus::Clean));

    // 原任务保持不变
    let original = h
        .submission
        .fetch_meta(OWNER, &prepared, TaskStatus::Prepared)
        .await
        .unwrap();
    assert_eq!(original.total, 4);
    assert_eq!(h.published_to(OWNER).await, vec![meta.task.clone()]);
}

#[tokio::test]
async fn test_process_skips_unavailable_model() {
    let h = Harness::start(50).await;
    let prepared = prepared_task(&h).await;
    h.hub
        .set_reject_enqueue(&h.destination(5).endpoint(), true)
        .await;
    h.hub.set_reachable(&h.destination(4).endpoint(), false).await;

    // gpu-a 同时承载两个模型，提交全部失败
    let err = h
        .submission
        .process_task(
            OWNER,
            &prepared,
            vec![update(1, vec![MOLECULE_MODEL]), update(4, vec![REACTION_MODEL])],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::DispatchUnavailable { .. }));

    h.hub.set_reachable(&h.destination(4).endpoint(), true).await;
    let meta = h
        .submission
        .process_task(
            OWNER,
            &prepared,
            vec![update(1, vec![MOLECULE_MODEL]), update(4, vec![REACTION_MODEL])],
        )
        .await
        .unwrap();
    let task = h.task_store.read(&meta.task).await.unwrap();
    assert_eq!(task.jobs.len(), 1);
    assert_eq!(task.jobs[0].model_id, MOLECULE_MODEL);
    assert_eq!(task.jobs[0].destination_id, 4);
}

#[tokio::test]
async fn test_process_rejects_bad_requests() {
    let h = Harness::start(50).await;
    let prepared = prepared_task(&h).await;

    let err = h
        .submission
        .process_task(OWNER, &prepared, vec![update(1, vec![99])])
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::InvalidInput(_)));

    // 类型不兼容，没有可提交的结构
    let err = h
        .submission
        .process_task(OWNER, &prepared, vec![update(1, vec![REACTION_MODEL])])
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::InvalidInput(_)));

    let err = h
        .submission
        .process_task(OWNER + 1, &prepared, vec![update(1, vec![MOLECULE_MODEL])])
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::AccessDenied { .. }));

    let populating = h
        .submission
        .create_prepared_task(OWNER, TaskType::Populating, molecules(1))
        .await
        .unwrap();
    let err = h
        .submission
        .process_task(OWNER, &populating.task, vec![update(1, vec![MOLECULE_MODEL])])
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::InvalidTaskState { .. }));
}

#[tokio::test]
async fn test_delete_task() {
    let h = Harness::start(50).await;
    let prepared = prepared_task(&h).await;

    let err = h.submission.delete_task(OWNER + 1, &prepared).await.unwrap_err();
    assert!(matches!(err, CimmError::AccessDenied { .. }));

    h.submission.delete_task(OWNER, &prepared).await.unwrap();
    let err = h
        .submission
        .fetch(OWNER, &prepared, TaskStatus::Prepared, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CimmError::TaskNotFound { .. }));
}
