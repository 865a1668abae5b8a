//! Orchestrator configuration: device layout, limits, timing and defaults.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::device::{DeviceTopology, CPU_DEVICE, GPU_CLASS};
use crate::core::resource_pool::LimitTable;
use crate::core::task::TaskKind;
use crate::core::AppResult;
use crate::util::Priority;

/// How waiting tasks compete for freed capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Whichever waiter re-checks first after capacity frees up.
    #[default]
    FirstEligible,
    /// Lower priority number first, then earlier registration.
    Priority,
}

impl FromStr for AdmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first_eligible" => Ok(Self::FirstEligible),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown admission policy `{other}`")),
        }
    }
}

/// Architectures accepted by default.
pub const DEFAULT_SUPPORTED_MODELS: [&str; 14] = [
    "resnet18",
    "resnet34",
    "resnet50",
    "resnet101",
    "resnet152",
    "vit_b_16",
    "vit_b_32",
    "vit_l_16",
    "vit_l_32",
    "swin_v2_t",
    "swin_v2_s",
    "swin_v2_b",
    "mobilenet_v3_large",
    "mobilenet_v3_small",
];

fn default_limits() -> LimitTable {
    BTreeMap::from([
        (
            GPU_CLASS.to_string(),
            BTreeMap::from([(TaskKind::Training, 1), (TaskKind::Inference, 3)]),
        ),
        (
            CPU_DEVICE.to_string(),
            BTreeMap::from([(TaskKind::Training, 2), (TaskKind::Inference, 4)]),
        ),
    ])
}

fn default_supported_models() -> Vec<String> {
    DEFAULT_SUPPORTED_MODELS
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_training_backoff_ms() -> u64 {
    2000
}

const fn default_inference_backoff_ms() -> u64 {
    1000
}

const fn default_stream_poll_interval_ms() -> u64 {
    500
}

fn default_training_priority() -> Priority {
    Priority::default()
}

fn default_inference_priority() -> Priority {
    Priority::new(3).unwrap_or_default()
}

const fn default_list_limit() -> usize {
    100
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of GPUs; devices are `cpu` plus `cuda:0..gpu_count`.
    #[serde(default)]
    pub gpu_count: usize,
    /// Explicit device list overriding `gpu_count`.
    #[serde(default)]
    pub devices: Option<Vec<String>>,
    /// Per device-or-class, per-kind concurrency limits.
    #[serde(default = "default_limits")]
    pub limits: LimitTable,
    /// Architectures training requests may name.
    #[serde(default = "default_supported_models")]
    pub supported_models: Vec<String>,
    /// Admission re-check interval for training.
    #[serde(default = "default_training_backoff_ms")]
    pub training_backoff_ms: u64,
    /// Admission re-check interval for inference.
    #[serde(default = "default_inference_backoff_ms")]
    pub inference_backoff_ms: u64,
    /// Log stream poll interval.
    #[serde(default = "default_stream_poll_interval_ms")]
    pub stream_poll_interval_ms: u64,
    /// Fail tasks that wait longer than this for admission.
    #[serde(default)]
    pub admission_timeout_secs: Option<u64>,
    /// Competition rule among waiters.
    #[serde(default)]
    pub admission_policy: AdmissionPolicy,
    /// Priority for training requests that give none.
    #[serde(default = "default_training_priority")]
    pub default_training_priority: Priority,
    /// Priority for inference requests that give none.
    #[serde(default = "default_inference_priority")]
    pub default_inference_priority: Priority,
    /// Priority recorded on preprocessing tasks.
    #[serde(default = "default_training_priority")]
    pub default_preprocessing_priority: Priority,
    /// Page size for task listings.
    #[serde(default = "default_list_limit")]
    pub default_list_limit: usize,
    /// Runtime worker threads when the orchestrator owns its runtime.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gpu_count: 0,
            devices: None,
            limits: default_limits(),
            supported_models: default_supported_models(),
            training_backoff_ms: default_training_backoff_ms(),
            inference_backoff_ms: default_inference_backoff_ms(),
            stream_poll_interval_ms: default_stream_poll_interval_ms(),
            admission_timeout_secs: None,
            admission_policy: AdmissionPolicy::default(),
            default_training_priority: default_training_priority(),
            default_inference_priority: default_inference_priority(),
            default_preprocessing_priority: default_training_priority(),
            default_list_limit: default_list_limit(),
            worker_threads: default_worker_threads(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults: no GPUs, limits GPU 1/3 and CPU 2/4.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the GPU count.
    #[must_use]
    pub fn with_gpu_count(mut self, gpu_count: usize) -> Self {
        self.gpu_count = gpu_count;
        self
    }

    /// Use an explicit device list.
    #[must_use]
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = Some(devices.into_iter().map(Into::into).collect());
        self
    }

    /// Set one limit, keeping all others.
    #[must_use]
    pub fn with_limit(mut self, device: impl Into<String>, kind: TaskKind, max: u32) -> Self {
        self.limits.entry(device.into()).or_default().insert(kind, max);
        self
    }

    /// Replace the whole limit table.
    #[must_use]
    pub fn with_limits(mut self, limits: LimitTable) -> Self {
        self.limits = limits;
        self
    }

    /// Set both admission backoffs.
    #[must_use]
    pub fn with_backoff(mut self, training: Duration, inference: Duration) -> Self {
        self.training_backoff_ms = training.as_millis() as u64;
        self.inference_backoff_ms = inference.as_millis() as u64;
        self
    }

    /// Set the stream poll interval.
    #[must_use]
    pub fn with_stream_poll_interval(mut self, interval: Duration) -> Self {
        self.stream_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Bound the admission wait.
    #[must_use]
    pub fn with_admission_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.admission_timeout_secs = match timeout {
            Some(t) => Some(t.as_secs()),
            None => None,
        };
        self
    }

    /// Set the admission policy.
    #[must_use]
    pub fn with_admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.admission_policy = policy;
        self
    }

    /// Replace the supported model list.
    #[must_use]
    pub fn with_supported_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Set the worker thread count.
    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Device layout implied by `devices` or `gpu_count`.
    #[must_use]
    pub fn topology(&self) -> DeviceTopology {
        self.devices.as_ref().map_or_else(
            || DeviceTopology::with_gpus(self.gpu_count),
            DeviceTopology::from_devices,
        )
    }

    /// Admission re-check interval for `kind`.
    #[must_use]
    pub const fn backoff_for(&self, kind: TaskKind) -> Duration {
        match kind {
            TaskKind::Training | TaskKind::Preprocessing => {
                Duration::from_millis(self.training_backoff_ms)
            }
            TaskKind::Inference => Duration::from_millis(self.inference_backoff_ms),
        }
    }

    /// Default priority for `kind`.
    #[must_use]
    pub const fn default_priority_for(&self, kind: TaskKind) -> Priority {
        match kind {
            TaskKind::Training => self.default_training_priority,
            TaskKind::Inference => self.default_inference_priority,
            TaskKind::Preprocessing => self.default_preprocessing_priority,
        }
    }

    /// Log stream poll interval.
    #[must_use]
    pub const fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_interval_ms)
    }

    /// Admission wait bound, if any.
    #[must_use]
    pub const fn admission_timeout(&self) -> Option<Duration> {
        match self.admission_timeout_secs {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_threads == 0 {
            return Err("worker_threads must be greater than 0".into());
        }
        if self.training_backoff_ms == 0 || self.inference_backoff_ms == 0 {
            return Err("admission backoff must be greater than 0".into());
        }
        if self.stream_poll_interval_ms == 0 {
            return Err("stream_poll_interval_ms must be greater than 0".into());
        }
        if self.admission_timeout_secs == Some(0) {
            return Err("admission_timeout_secs must be greater than 0 when set".into());
        }
        if self.default_list_limit == 0 {
            return Err("default_list_limit must be greater than 0".into());
        }
        if self.supported_models.is_empty() {
            return Err("at least one supported model must be listed".into());
        }
        if let Some(devices) = &self.devices {
            if devices.is_empty() {
                return Err("explicit device list must not be empty".into());
            }
            if let Some(bad) = devices.iter().find(|d| d.trim().is_empty()) {
                return Err(format!("invalid device name `{bad}`"));
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure text.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by process environment (after loading `.env`).
    ///
    /// # Errors
    ///
    /// An unparsable variable or an invalid result.
    pub fn from_env() -> AppResult<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                tracing::warn!(error = %err, "failed to load .env");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns per key.
    ///
    /// # Errors
    ///
    /// An unparsable value or an invalid result.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T, F>(lookup: &F, key: &str) -> AppResult<Option<T>>
        where
            T: FromStr,
            T::Err: std::fmt::Display,
            F: Fn(&str) -> Option<String>,
        {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<T>()
                        .map_err(|e| anyhow::anyhow!("{e}"))
                        .with_context(|| format!("invalid value for {key}: `{raw}`"))
                })
                .transpose()
        }

        let mut cfg = Self::default();
        if let Some(n) = parse::<usize, _>(&lookup, "DEVICELOT_GPU_COUNT")? {
            cfg.gpu_count = n;
        }
        let overrides = [
            ("MAX_TRAINING_CONCURRENT_GPU", GPU_CLASS, TaskKind::Training),
            ("MAX_INFERENCE_CONCURRENT_GPU", GPU_CLASS, TaskKind::Inference),
            ("MAX_TRAINING_CONCURRENT_CPU", CPU_DEVICE, TaskKind::Training),
            ("MAX_INFERENCE_CONCURRENT_CPU", CPU_DEVICE, TaskKind::Inference),
        ];
        for (key, device, kind) in overrides {
            if let Some(max) = parse::<u32, _>(&lookup, key)? {
                cfg = cfg.with_limit(device, kind, max);
            }
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "DEVICELOT_ADMISSION_TIMEOUT_SECS")? {
            cfg.admission_timeout_secs = Some(secs);
        }
        if let Some(policy) = parse::<AdmissionPolicy, _>(&lookup, "DEVICELOT_ADMISSION_POLICY")? {
            cfg.admission_policy = policy;
        }
        cfg.validate()
            .map_err(|e| anyhow::anyhow!(e))
            .context("invalid orchestrator configuration from environment")?;
        Ok(cfg)
    }
}
