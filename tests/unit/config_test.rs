//! Tests for configuration validation

use std::time::Duration;

use devicelot::config::{AdmissionPolicy, OrchestratorConfig};
use devicelot::core::TaskKind;

#[test]
fn test_default_config_is_valid() {
    let cfg = OrchestratorConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.limits["cuda"][&TaskKind::Training], 1);
    assert_eq!(cfg.limits["cuda"][&TaskKind::Inference], 3);
    assert_eq!(cfg.limits["cpu"][&TaskKind::Training], 2);
    assert_eq!(cfg.limits["cpu"][&TaskKind::Inference], 4);
    assert_eq!(cfg.admission_policy, AdmissionPolicy::FirstEligible);
    assert!(cfg.admission_timeout().is_none());
}

#[test]
fn test_zero_backoff_rejected() {
    let cfg = OrchestratorConfig::default().with_backoff(Duration::ZERO, Duration::from_secs(1));
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_poll_interval_rejected() {
    let mut cfg = OrchestratorConfig::default();
    cfg.stream_poll_interval_ms = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_empty_device_list_rejected() {
    let cfg = OrchestratorConfig::default().with_devices(Vec::<String>::new());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_empty_model_list_rejected() {
    let cfg = OrchestratorConfig::default().with_supported_models(Vec::<String>::new());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_topology_from_gpu_count() {
    let cfg = OrchestratorConfig::default().with_gpu_count(2);
    assert_eq!(cfg.topology().devices(), ["cpu", "cuda:0", "cuda:1"]);
}

#[test]
fn test_json_config_with_partial_limits() {
    let cfg = OrchestratorConfig::from_json_str(
        r#"{"gpu_count": 1, "limits": {"cuda": {"training": 2}}, "admission_policy": "priority"}"#,
    )
    .unwrap();
    assert_eq!(cfg.gpu_count, 1);
    assert_eq!(cfg.limits["cuda"][&TaskKind::Training], 2);
    assert!(!cfg.limits.contains_key("cpu"));
    assert_eq!(cfg.admission_policy, AdmissionPolicy::Priority);
}

#[test]
fn test_lookup_overrides() {
    let cfg = OrchestratorConfig::from_lookup(|key| match key {
        "DEVICELOT_GPU_COUNT" => Some("4".to_string()),
        "MAX_TRAINING_CONCURRENT_GPU" => Some("2".to_string()),
        "DEVICELOT_ADMISSION_POLICY" => Some("priority".to_string()),
        _ => None,
    })
    .unwrap();
    assert_eq!(cfg.gpu_count, 4);
    assert_eq!(cfg.limits["cuda"][&TaskKind::Training], 2);
    assert_eq!(cfg.limits["cuda"][&TaskKind::Inference], 3);
    assert_eq!(cfg.admission_policy, AdmissionPolicy::Priority);
}

#[test]
fn test_lookup_rejects_garbage() {
    let err = OrchestratorConfig::from_lookup(|key| {
        (key == "MAX_INFERENCE_CONCURRENT_CPU").then(|| "lots".to_string())
    })
    .unwrap_err();
    assert!(format!("{err:#}").contains("MAX_INFERENCE_CONCURRENT_CPU"));
}
