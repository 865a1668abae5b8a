//! Tests for runtime adapters and API DTOs

use std::collections::BTreeMap;

use devicelot::core::{Task, TaskKind, TaskStatus};
use devicelot::runtime::{ResourceConfigUpdate, TaskActionResponse, TaskListResponse, TaskResponse};

#[test]
fn test_task_response_serializes_wire_names() {
    let mut task = Task::new("t9".into(), TaskKind::Inference, TaskStatus::Running);
    task.device = Some("cuda:0".into());
    let json = serde_json::to_value(TaskResponse::from(&task)).unwrap();
    assert_eq!(json["task_id"], "t9");
    assert_eq!(json["task_type"], "inference");
    assert_eq!(json["status"], "running");
    assert_eq!(json["device"], "cuda:0");
    assert!(json.get("stats").is_none());
}

#[test]
fn test_grouped_listing_totals() {
    let tasks: Vec<Task> = TaskKind::ALL
        .into_iter()
        .enumerate()
        .map(|(i, kind)| Task::new(format!("t{i}"), kind, TaskStatus::Pending))
        .collect();
    let list = TaskListResponse::from_tasks(&tasks);
    assert_eq!(
        (list.total_training, list.total_inference, list.total_preprocessing),
        (1, 1, 1)
    );
}

#[test]
fn test_action_response_json() {
    let json = serde_json::to_value(TaskActionResponse::cancelled("abc", false)).unwrap();
    assert_eq!(json["status"], "error");
    assert_eq!(json["task_id"], "abc");
}

#[test]
fn test_config_update_accepts_missing_limits() {
    let update: ResourceConfigUpdate = serde_json::from_str("{}").unwrap();
    assert!(update.max_concurrent.is_none());
    let update: ResourceConfigUpdate =
        serde_json::from_str(r#"{"max_concurrent": {"cpu": {"training": 1}}}"#).unwrap();
    assert_eq!(
        update.max_concurrent.unwrap()["cpu"],
        BTreeMap::from([(TaskKind::Training, 1)])
    );
}
