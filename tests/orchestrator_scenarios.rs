//! End-to-end orchestration scenarios: admission, balancing, lifecycle and
//! outcome mapping, driven through mock delegates.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{fast_config, Behavior, Harness};
use devicelot::core::{
    BatchInferenceRequest, InferenceRequest, LogLevel, MetricsSnapshot, OrchestratorError,
    PreprocessJob, PreprocessRequest, Task, TaskKind, TaskRegistry, TaskStatus, TrainingRequest,
};
use devicelot::util::Priority;

fn training(h: &Harness, device: &str) -> TrainingRequest {
    let mut req = TrainingRequest::new(
        "resnet18",
        3,
        h.path("train"),
        h.path("val"),
        h.path("checkpoints"),
    );
    req.device = device.to_string();
    req.num_epochs = 2;
    req
}

fn inference(h: &Harness) -> InferenceRequest {
    InferenceRequest::new(h.path("cfg.yaml"), h.path("weights.pt"), h.path("images"))
}

fn assert_no_holder(h: &Harness, task_id: &str) {
    let status = h.orchestrator.resource_status();
    assert!(
        status
            .active
            .values()
            .flatten()
            .all(|entry| entry.task_id != task_id),
        "{task_id} still holds a device"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_training_waits_for_first() {
    let h = Harness::new(fast_config(1), Behavior::Hold);
    let orch = &h.orchestrator;

    let t1 = orch.submit(training(&h, "cuda")).unwrap();
    let started = h.next_started().await;
    assert_eq!(started.task_id, t1);
    assert_eq!(started.device, "cuda:0");
    assert_eq!(orch.pool().usage("cuda:0", TaskKind::Training), 1);

    let t2 = orch.submit(training(&h, "cuda")).unwrap();
    h.wait_for(&t2, TaskStatus::Queued).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(orch.get_task(&t2).unwrap().status, TaskStatus::Queued);
    assert_eq!(orch.pool().usage("cuda:0", TaskKind::Training), 1);

    h.release_one();
    h.wait_for(&t1, TaskStatus::Completed).await;
    let started = h.next_started().await;
    assert_eq!(started.task_id, t2);
    h.wait_for(&t2, TaskStatus::Running).await;
    assert_eq!(orch.pool().usage("cuda:0", TaskKind::Training), 1);

    h.release_one();
    h.wait_for(&t2, TaskStatus::Completed).await;
    assert_eq!(orch.pool().usage("cuda:0", TaskKind::Training), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_class_request_lands_on_free_member() {
    let h = Harness::new(fast_config(2), Behavior::Hold);
    let orch = &h.orchestrator;

    let a = orch.submit(training(&h, "cuda:0")).unwrap();
    assert_eq!(h.next_started().await.device, "cuda:0");
    let b = orch.submit(training(&h, "cuda")).unwrap();
    assert_eq!(h.next_started().await.device, "cuda:1");

    let status = orch.resource_status();
    assert_eq!(status.usage["cuda:0"][&TaskKind::Training], 1);
    assert_eq!(status.usage["cuda:1"][&TaskKind::Training], 1);
    assert_eq!(orch.get_task(&b).unwrap().device.as_deref(), Some("cuda:1"));

    h.release_one();
    h.release_one();
    h.wait_for(&a, TaskStatus::Completed).await;
    h.wait_for(&b, TaskStatus::Completed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_auto_requests_spread_across_class() {
    let h = Harness::new(fast_config(2), Behavior::Hold);
    let orch = &h.orchestrator;

    orch.submit(training(&h, "cuda")).unwrap();
    orch.submit(training(&h, "cuda")).unwrap();
    let first = h.next_started().await.device;
    let second = h.next_started().await.device;
    assert_ne!(first, second);

    h.release_one();
    h.release_one();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_queued_leaves_ledger_untouched() {
    let h = Harness::new(fast_config(1), Behavior::Hold);
    let orch = &h.orchestrator;

    let holder = orch.submit(training(&h, "cuda")).unwrap();
    h.next_started().await;
    let waiter = orch.submit(training(&h, "cuda")).unwrap();
    h.wait_for(&waiter, TaskStatus::Queued).await;
    let before = orch.resource_status().usage;

    assert!(orch.cancel(&waiter));
    h.wait_for(&waiter, TaskStatus::Cancelled).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_no_holder(&h, &waiter);
    assert_eq!(orch.resource_status().usage, before);
    assert_eq!(orch.pool().waiting(), 0);
    assert!(!orch.cancel(&waiter), "terminal tasks cannot be cancelled again");

    h.release_one();
    h.wait_for(&holder, TaskStatus::Completed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_running_task_releases_device() {
    let h = Harness::new(fast_config(1), Behavior::Hold);
    let orch = &h.orchestrator;

    let id = orch.submit(training(&h, "cuda")).unwrap();
    h.next_started().await;
    assert!(orch.cancel(&id));
    h.wait_for(&id, TaskStatus::Cancelled).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while orch.pool().usage("cuda:0", TaskKind::Training) != 0 {
        assert!(tokio::time::Instant::now() < deadline, "device never released");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_no_holder(&h, &id);
    let task = orch.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_only_after_terminal() {
    let h = Harness::new(fast_config(1), Behavior::Hold);
    let orch = &h.orchestrator;

    let id = orch.submit(training(&h, "cuda")).unwrap();
    h.next_started().await;
    h.wait_for(&id, TaskStatus::Running).await;
    assert!(!orch.delete(&id));
    assert!(orch.get_task(&id).is_some());

    h.release_one();
    h.wait_for(&id, TaskStatus::Completed).await;
    assert!(orch.delete(&id));
    assert!(orch.get_task(&id).is_none());
    assert!(matches!(orch.logs(&id), Err(OrchestratorError::NotFound(_))));
    assert!(!orch.delete(&id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deleted_running_task_stays_deleted() {
    let h = Harness::new(fast_config(1), Behavior::Hold);
    let orch = &h.orchestrator;

    let id = orch.submit(training(&h, "cuda")).unwrap();
    h.next_started().await;
    assert!(orch.cancel(&id));
    assert!(orch.delete(&id));
    assert!(orch.get_task(&id).is_none());
    h.release_one();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while orch.pool().usage("cuda:0", TaskKind::Training) != 0 {
        assert!(tokio::time::Instant::now() < deadline, "device never released");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(orch.get_task(&id).is_none(), "deleted task came back");
    assert!(orch.list_tasks(None, None, None).is_empty());
    assert!(matches!(orch.logs(&id), Err(OrchestratorError::NotFound(_))));
    assert_eq!(orch.health().tasks_by_kind.get(&TaskKind::Training), Some(&0));
    assert_no_holder(&h, &id);
}

#[tokio::test]
async fn test_deleted_pending_task_never_runs() {
    let h = Harness::new(fast_config(1), Behavior::Succeed);
    let orch = &h.orchestrator;

    // current-thread runtime: the worker cannot start before the next await
    let id = orch.submit(training(&h, "cuda")).unwrap();
    assert!(orch.cancel(&id));
    assert!(orch.delete(&id));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(h.started.try_recv().is_err(), "delegate started for a deleted task");
    assert!(orch.get_task(&id).is_none());
    assert_eq!(orch.pool().usage("cuda:0", TaskKind::Training), 0);
    assert_eq!(orch.pool().waiting(), 0);
    assert_no_holder(&h, &id);
}

#[test]
fn test_metrics_merge_drives_progress() {
    let registry = TaskRegistry::new();
    let mut task = Task::new("m".into(), TaskKind::Training, TaskStatus::Running);
    task.total_epochs = Some(5);
    registry.create(task).unwrap();

    registry.update_metrics(
        "m",
        &MetricsSnapshot {
            epoch: Some(1),
            total_epochs: Some(5),
            ..MetricsSnapshot::default()
        },
    );
    let task = registry
        .update_metrics(
            "m",
            &MetricsSnapshot {
                train_loss: Some(0.5),
                train_acc: Some(80.0),
                ..MetricsSnapshot::default()
            },
        )
        .unwrap();

    let expected = BTreeMap::from([
        ("epoch".to_string(), 1.0),
        ("total_epochs".to_string(), 5.0),
        ("train_loss".to_string(), 0.5),
        ("train_acc".to_string(), 80.0),
    ]);
    assert_eq!(task.latest_metrics.to_map(), expected);
    assert_eq!(task.progress, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_completed_training_carries_metrics_and_logs() {
    let h = Harness::new(fast_config(1), Behavior::Succeed);
    let orch = &h.orchestrator;

    let id = orch.submit(training(&h, "cuda")).unwrap();
    h.wait_for(&id, TaskStatus::Completed).await;

    let task = orch.get_task(&id).unwrap();
    assert_eq!(task.progress, 100);
    assert_eq!(task.message, "training completed");
    assert_eq!(task.latest_metrics.epoch, Some(2));
    assert_eq!(task.latest_metrics.total_epochs, Some(2));
    assert_eq!(task.latest_metrics.train_loss, Some(0.5));
    assert!(h.path("checkpoints").is_dir());

    let logs = orch.logs(&id).unwrap();
    let messages: Vec<&str> = logs.iter().map(|e| e.message.as_str()).collect();
    assert!(messages.contains(&"waiting for CUDA resources..."));
    assert!(messages.contains(&"resources allocated, using device: cuda:0"));
    assert!(messages.contains(&"Training completed"));
    assert!(logs.iter().any(|e| e.metrics.is_some()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delegate_failure_marks_task_failed() {
    let h = Harness::new(fast_config(1), Behavior::Fail("CUDA out of memory".into()));
    let orch = &h.orchestrator;

    let id = orch.submit(training(&h, "cuda")).unwrap();
    h.wait_for(&id, TaskStatus::Failed).await;
    let task = orch.get_task(&id).unwrap();
    assert_eq!(task.message, "CUDA out of memory");
    assert_no_holder(&h, &id);
    let logs = orch.logs(&id).unwrap();
    let last = logs.last().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.message, "CUDA out of memory");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_build_failure_marks_task_failed() {
    let h = Harness::new(fast_config(1), Behavior::BuildFails("weights missing".into()));
    let id = h.orchestrator.submit(inference(&h)).unwrap();
    h.wait_for(&id, TaskStatus::Failed).await;
    assert_eq!(h.orchestrator.get_task(&id).unwrap().message, "weights missing");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delegate_panic_is_contained() {
    let h = Harness::new(fast_config(1), Behavior::Panic);
    let orch = &h.orchestrator;

    let id = orch.submit(training(&h, "cuda")).unwrap();
    h.wait_for(&id, TaskStatus::Failed).await;
    assert_eq!(orch.get_task(&id).unwrap().message, "delegate panicked");
    assert_eq!(orch.pool().usage("cuda:0", TaskKind::Training), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_admission_timeout_fails_waiter() {
    let cfg = fast_config(1).with_admission_timeout(Some(Duration::from_secs(1)));
    let h = Harness::new(cfg, Behavior::Hold);
    let orch = &h.orchestrator;

    let holder = orch.submit(training(&h, "cuda")).unwrap();
    h.next_started().await;
    let waiter = orch.submit(training(&h, "cuda")).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while orch.get_task(&waiter).map(|t| t.status) != Some(TaskStatus::Failed) {
        assert!(tokio::time::Instant::now() < deadline, "waiter never timed out");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_no_holder(&h, &waiter);

    h.release_one();
    h.wait_for(&holder, TaskStatus::Completed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inference_and_training_have_separate_budgets() {
    let h = Harness::new(fast_config(1), Behavior::Hold);
    let orch = &h.orchestrator;

    orch.submit(training(&h, "cuda")).unwrap();
    h.next_started().await;
    for _ in 0..3 {
        orch.submit(inference(&h)).unwrap();
        assert_eq!(h.next_started().await.device, "cuda:0");
    }
    let fourth = orch.submit(inference(&h)).unwrap();
    h.wait_for(&fourth, TaskStatus::Queued).await;
    assert_eq!(orch.pool().usage("cuda:0", TaskKind::Inference), 3);
    assert_eq!(orch.pool().usage("cuda:0", TaskKind::Training), 1);

    for _ in 0..5 {
        h.release_one();
    }
    h.wait_for(&fourth, TaskStatus::Completed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raised_limit_admits_waiter() {
    let h = Harness::new(fast_config(1), Behavior::Hold);
    let orch = &h.orchestrator;

    orch.submit(training(&h, "cuda")).unwrap();
    h.next_started().await;
    let waiter = orch.submit(training(&h, "cuda")).unwrap();
    h.wait_for(&waiter, TaskStatus::Queued).await;

    orch.update_limits(BTreeMap::from([(
        "cuda".to_string(),
        BTreeMap::from([(TaskKind::Training, 2)]),
    )]));
    assert_eq!(h.next_started().await.task_id, waiter);
    assert_eq!(orch.resource_status().limits["cuda"][&TaskKind::Inference], 3);

    h.release_one();
    h.release_one();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_validation_rejects_before_registering() {
    let h = Harness::new(fast_config(1), Behavior::Succeed);
    let orch = &h.orchestrator;

    let mut bad_model = training(&h, "cuda");
    bad_model.model = "not-a-net".into();
    assert!(matches!(
        orch.submit(bad_model),
        Err(OrchestratorError::Validation(_))
    ));

    let mut missing = training(&h, "cuda");
    missing.train_path = h.path("nope");
    assert!(matches!(orch.submit(missing), Err(OrchestratorError::Validation(_))));

    assert!(matches!(
        orch.submit(training(&h, "cuda:7")),
        Err(OrchestratorError::UnknownDevice(_))
    ));
    assert!(matches!(
        orch.submit(training(&h, "tpu")),
        Err(OrchestratorError::UnknownDevice(_))
    ));

    assert!(orch.list_tasks(None, None, None).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_caller_chosen_id_must_be_unique() {
    let h = Harness::new(fast_config(1), Behavior::Succeed);
    let mut req = training(&h, "cpu");
    req.task_id = Some("fixed".into());
    assert_eq!(h.orchestrator.submit(req.clone()).unwrap(), "fixed");
    assert!(matches!(
        h.orchestrator.submit(req),
        Err(OrchestratorError::Validation(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_inference_expands_save_paths() {
    let h = Harness::new(fast_config(1), Behavior::Succeed);
    let orch = &h.orchestrator;
    std::fs::create_dir_all(h.path("images2")).unwrap();

    let batch = BatchInferenceRequest {
        config_path: h.path("cfg.yaml"),
        weight_path: h.path("weights.pt"),
        source_paths: vec![h.path("images"), h.path("images2")],
        save_base_path: Some(h.path("out")),
        device: "cuda".into(),
        priority: None,
    };
    let ids = orch.submit_batch_inference(batch.clone()).unwrap();
    assert_eq!(ids.len(), 2);
    for id in &ids {
        h.wait_for(id, TaskStatus::Completed).await;
    }

    let mut bad = batch.clone();
    bad.source_paths.push(h.path("missing"));
    assert!(orch.submit_batch_inference(bad).is_err());
    assert_eq!(orch.list_tasks(None, Some(TaskKind::Inference), None).len(), 2);

    let mut empty = batch;
    empty.source_paths.clear();
    assert!(matches!(
        orch.submit_batch_inference(empty),
        Err(OrchestratorError::Validation(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_preprocessing_runs_on_cpu_and_keeps_stats() {
    let h = Harness::new(fast_config(0), Behavior::Succeed);
    let orch = &h.orchestrator;

    let job = PreprocessJob::Split {
        input_path: h.path("dataset"),
        output_path: h.path("split"),
        train_ratio: 0.8,
        val_ratio: None,
    };
    let id = orch.submit(PreprocessRequest::new(job)).unwrap();
    h.wait_for(&id, TaskStatus::Completed).await;

    let task = orch.get_task(&id).unwrap();
    assert_eq!(task.kind, TaskKind::Preprocessing);
    assert_eq!(task.device.as_deref(), Some("cpu"));
    let stats = task.stats.unwrap();
    assert_eq!(stats["operation"], "split");
    assert_eq!(stats["files"], 12);
    assert!(orch.resource_status().active["cpu"].is_empty());

    let bad = PreprocessJob::Split {
        input_path: h.path("dataset"),
        output_path: h.path("split"),
        train_ratio: 0.95,
        val_ratio: None,
    };
    assert!(orch.submit(PreprocessRequest::new(bad)).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listing_filters_and_health() {
    let h = Harness::new(fast_config(1), Behavior::Hold);
    let orch = &h.orchestrator;

    let t = orch.submit(training(&h, "cuda")).unwrap();
    h.next_started().await;
    let i = orch.submit(inference(&h)).unwrap();
    h.next_started().await;
    h.wait_for(&i, TaskStatus::Running).await;

    let all = orch.list_tasks(None, None, None);
    assert_eq!(
        all.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        [t.as_str(), i.as_str()]
    );
    assert_eq!(orch.list_tasks(None, Some(TaskKind::Inference), None).len(), 1);
    assert_eq!(orch.list_tasks(Some(TaskStatus::Running), None, Some(1)).len(), 1);
    assert!(orch.list_tasks(Some(TaskStatus::Failed), None, None).is_empty());

    let health = orch.health();
    assert_eq!(health.tasks_by_kind.get(&TaskKind::Training), Some(&1));
    assert_eq!(health.tasks_by_kind.get(&TaskKind::Inference), Some(&1));
    assert_eq!(health.active_log_streams, 0);

    h.release_one();
    h.release_one();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_default_priorities_by_kind() {
    let h = Harness::new(fast_config(1), Behavior::Succeed);
    let orch = &h.orchestrator;

    let t = orch.submit(training(&h, "cpu")).unwrap();
    let i = orch.submit(inference(&h)).unwrap();
    let mut explicit = training(&h, "cpu");
    explicit.priority = Some(Priority::HIGHEST);
    let e = orch.submit(explicit).unwrap();

    assert_eq!(orch.get_task(&t).unwrap().priority, Priority::default());
    assert_eq!(orch.get_task(&i).unwrap().priority.get(), 3);
    assert_eq!(orch.get_task(&e).unwrap().priority, Priority::HIGHEST);
}
