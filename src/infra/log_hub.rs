//! Per-task log storage: a retained history plus a one-shot live queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::error::OrchestratorError;
use crate::core::event::LogEvent;
use crate::util::TaskId;

#[derive(Default)]
struct TaskLog {
    /// Present while a live consumer may read; `None` after tear-down.
    live: Option<VecDeque<LogEvent>>,
    history: Vec<LogEvent>,
    attached: bool,
    notify: Arc<Notify>,
}

/// Log storage keyed by task id.
///
/// Every event lands in the history. Events also land in the live queue
/// when one is open, and wake the single attached consumer.
#[derive(Default)]
pub struct LogHub {
    logs: Mutex<HashMap<TaskId, TaskLog>>,
}

impl std::fmt::Debug for LogHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHub")
            .field("tasks", &self.logs.lock().len())
            .finish()
    }
}

impl LogHub {
    /// Empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the history and live queue for a task if missing.
    pub fn open(&self, task_id: &str) {
        let mut logs = self.logs.lock();
        let log = logs.entry(task_id.to_string()).or_default();
        if log.live.is_none() {
            log.live = Some(VecDeque::new());
        }
    }

    /// Record an event. Ignored for tasks that were never opened or have
    /// been removed.
    pub fn push(&self, task_id: &str, event: LogEvent) {
        let notify = {
            let mut logs = self.logs.lock();
            let Some(log) = logs.get_mut(task_id) else {
                tracing::trace!(task_id, "dropping log event for unknown task");
                return;
            };
            if let Some(live) = log.live.as_mut() {
                live.push_back(event.clone());
            }
            log.history.push(event);
            Arc::clone(&log.notify)
        };
        notify.notify_one();
    }

    /// Claim the live queue for a consumer, reopening it if needed.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for a task that was never opened and
    /// [`OrchestratorError::StreamBusy`] while another consumer is attached.
    pub fn attach(&self, task_id: &str) -> Result<Arc<Notify>, OrchestratorError> {
        let mut logs = self.logs.lock();
        let log = logs
            .get_mut(task_id)
            .ok_or_else(|| OrchestratorError::NotFound(task_id.to_string()))?;
        if log.attached {
            return Err(OrchestratorError::StreamBusy(task_id.to_string()));
        }
        log.attached = true;
        if log.live.is_none() {
            log.live = Some(VecDeque::new());
        }
        Ok(Arc::clone(&log.notify))
    }

    /// Take everything queued for the live consumer, oldest first.
    #[must_use]
    pub fn drain(&self, task_id: &str) -> Vec<LogEvent> {
        self.logs
            .lock()
            .get_mut(task_id)
            .and_then(|log| log.live.as_mut())
            .map(|live| live.drain(..).collect())
            .unwrap_or_default()
    }

    /// Release the consumer claim and discard the live queue.
    pub fn detach(&self, task_id: &str) {
        if let Some(log) = self.logs.lock().get_mut(task_id) {
            log.attached = false;
            log.live = None;
        }
    }

    /// Full history in push order.
    #[must_use]
    pub fn history(&self, task_id: &str) -> Vec<LogEvent> {
        self.logs
            .lock()
            .get(task_id)
            .map(|log| log.history.clone())
            .unwrap_or_default()
    }

    /// Drop everything stored for a task.
    pub fn remove(&self, task_id: &str) {
        self.logs.lock().remove(task_id);
    }

    /// Number of tasks with an attached consumer.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.logs.lock().values().filter(|log| log.attached).count()
    }
}
