//! Per-task sink for delegate output: parses lines, merges metrics and
//! records log events.

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::event::{LogEvent, LogLevel};
use crate::core::metrics::{LogLineParser, MetricsSnapshot, Stage};
use crate::core::registry::TaskRegistry;
use crate::infra::log_hub::LogHub;
use crate::util::TaskId;

/// Handle given to delegates for reporting progress of one task.
pub struct TaskReporter {
    task_id: TaskId,
    registry: Arc<TaskRegistry>,
    hub: Arc<LogHub>,
    parser: Mutex<LogLineParser>,
}

impl std::fmt::Debug for TaskReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskReporter")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

impl TaskReporter {
    /// Reporter writing into `registry` and `hub` for `task_id`.
    pub fn new(task_id: impl Into<TaskId>, registry: Arc<TaskRegistry>, hub: Arc<LogHub>) -> Self {
        Self {
            task_id: task_id.into(),
            registry,
            hub,
            parser: Mutex::new(LogLineParser::new()),
        }
    }

    /// Task this reporter writes for.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Record a raw line. Recognised metrics are merged into the task before
    /// the event is queued.
    pub fn log(&self, level: LogLevel, line: &str) {
        let parsed = self.parser.lock().parse(line);
        let mut event = LogEvent::new(level, line).with_stage(parsed.stage);
        if let Some(metrics) = parsed.metrics {
            self.registry.update_metrics(&self.task_id, &metrics);
            event = event
                .with_step(metrics.epoch)
                .with_metrics(metrics.to_map());
        }
        tracing::trace!(task_id = %self.task_id, %level, line, "delegate output");
        self.hub.push(&self.task_id, event);
    }

    /// [`TaskReporter::log`] at info level.
    pub fn info(&self, line: &str) {
        self.log(LogLevel::Info, line);
    }

    /// [`TaskReporter::log`] at warning level.
    pub fn warn(&self, line: &str) {
        self.log(LogLevel::Warning, line);
    }

    /// [`TaskReporter::log`] at error level.
    pub fn error(&self, line: &str) {
        self.log(LogLevel::Error, line);
    }

    /// Typed metrics path: merge `snapshot` without text scraping.
    pub fn report_metrics(&self, snapshot: &MetricsSnapshot, stage: Option<Stage>) {
        if snapshot.is_empty() {
            return;
        }
        self.registry.update_metrics(&self.task_id, snapshot);
        let map = snapshot.to_map();
        let mut message = String::from("metrics");
        for (i, (name, value)) in map.iter().enumerate() {
            let sep = if i == 0 { ": " } else { ", " };
            let _ = write!(message, "{sep}{name}={value}");
        }
        let event = LogEvent::info(message)
            .with_metrics(map)
            .with_stage(stage)
            .with_step(snapshot.epoch);
        self.hub.push(&self.task_id, event);
    }
}
