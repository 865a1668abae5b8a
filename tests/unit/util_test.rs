//! Tests for utility functions

use devicelot::util::{generate_task_id, init_tracing, Priority};

#[test]
fn test_priority_ordering() {
    assert!(Priority::HIGHEST < Priority::default());
    assert!(Priority::default() < Priority::LOWEST);
}

#[test]
fn test_priority_bounds() {
    assert!(Priority::new(0).is_err());
    assert!(Priority::new(11).is_err());
    assert_eq!(Priority::new(7).unwrap().get(), 7);
    assert!(serde_json::from_str::<Priority>("12").is_err());
}

#[test]
fn test_task_id_generation() {
    assert_eq!(generate_task_id(Some("mine")), "mine");
    let a = generate_task_id(None);
    let b = generate_task_id(Some(""));
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}
