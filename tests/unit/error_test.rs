//! Tests for error types

use devicelot::core::{DelegateError, OrchestratorError, TaskKind, TaskStatus};

#[test]
fn test_validation_error() {
    let err = OrchestratorError::Validation("num_classes must be > 0".to_string());
    assert_eq!(format!("{err}"), "validation error: num_classes must be > 0");
}

#[test]
fn test_unknown_device_error() {
    let err = OrchestratorError::UnknownDevice("cuda:9".to_string());
    assert_eq!(format!("{err}"), "unknown device: cuda:9");
}

#[test]
fn test_invalid_transition_error() {
    let err = OrchestratorError::InvalidTransition {
        id: "t1".to_string(),
        from: TaskStatus::Completed,
        to: TaskStatus::Running,
    };
    assert_eq!(
        format!("{err}"),
        "invalid transition for task t1: completed -> running"
    );
}

#[test]
fn test_capacity_exceeded_error() {
    let err = OrchestratorError::CapacityExceeded {
        device: "cuda".to_string(),
        kind: TaskKind::Training,
    };
    assert_eq!(format!("{err}"), "capacity exceeded on cuda for training");
}

#[test]
fn test_delegate_failure_is_verbatim() {
    assert_eq!(DelegateError::failed("out of memory").to_string(), "out of memory");
    assert_eq!(DelegateError::Cancelled.to_string(), "cancelled");
}

#[test]
fn test_io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
    let err: DelegateError = io.into();
    assert!(matches!(err, DelegateError::Io(_)));
    assert_eq!(err.to_string(), "io error: read-only");
}
