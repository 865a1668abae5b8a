//! Live log streaming: drains a task's live queue into an ordered sequence of
//! frames terminated by exactly one end sentinel.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::core::error::OrchestratorError;
use crate::core::event::LogEvent;
use crate::core::registry::TaskRegistry;
use crate::core::task::TaskStatus;
use crate::infra::log_hub::LogHub;
use crate::util::TaskId;

/// Message carried by the end sentinel.
pub const STREAM_END_MESSAGE: &str = "task ended";

/// Final frame of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEnd {
    /// Terminal status of the task.
    pub status: TaskStatus,
    /// Always [`STREAM_END_MESSAGE`].
    pub message: String,
}

/// One item pushed to a log consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamFrame {
    /// A log event.
    Event(LogEvent),
    /// The terminal sentinel.
    End(StreamEnd),
}

impl StreamFrame {
    /// Sentinel for `status`.
    #[must_use]
    pub fn end(status: TaskStatus) -> Self {
        Self::End(StreamEnd {
            status,
            message: STREAM_END_MESSAGE.to_string(),
        })
    }

    /// Whether this is the sentinel.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }

    /// Server-sent-events encoding: `data: <JSON>\n\n`.
    ///
    /// # Errors
    ///
    /// Propagates JSON serialization failures.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Boxed frame stream handed to consumers.
pub type LogStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

/// Holds the single-consumer claim; tear-down discards the live queue.
struct Attachment {
    hub: Arc<LogHub>,
    task_id: TaskId,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.hub.detach(&self.task_id);
        tracing::debug!(task_id = %self.task_id, "log stream detached");
    }
}

struct StreamState {
    attachment: Attachment,
    registry: Arc<TaskRegistry>,
    notify: Arc<Notify>,
    poll: Duration,
    pending: VecDeque<LogEvent>,
    ending: Option<TaskStatus>,
    done: bool,
}

impl StreamState {
    async fn next_frame(&mut self) -> Option<StreamFrame> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(StreamFrame::Event(event));
            }
            if let Some(status) = self.ending.take() {
                self.done = true;
                return Some(StreamFrame::end(status));
            }
            if self.done {
                return None;
            }

            let task_id = &self.attachment.task_id;
            // status first, so events pushed before a terminal upsert are drained
            let Some(status) = self.registry.status(task_id) else {
                // only terminal tasks can be deleted; the final status went with the record
                tracing::debug!(task_id = %task_id, "task removed while streaming");
                self.ending = Some(TaskStatus::Cancelled);
                continue;
            };
            self.pending.extend(self.attachment.hub.drain(task_id));
            if status.is_terminal() {
                self.ending = Some(status);
                continue;
            }
            if !self.pending.is_empty() {
                continue;
            }
            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep(self.poll) => {}
            }
        }
    }
}

/// Attach to `task_id`'s live queue.
///
/// # Errors
///
/// [`OrchestratorError::NotFound`] for an unknown task and
/// [`OrchestratorError::StreamBusy`] when a consumer is already attached.
pub fn open_stream(
    task_id: &str,
    registry: Arc<TaskRegistry>,
    hub: Arc<LogHub>,
    poll: Duration,
) -> Result<LogStream, OrchestratorError> {
    if !registry.contains(task_id) {
        return Err(OrchestratorError::NotFound(task_id.to_string()));
    }
    let notify = hub.attach(task_id)?;
    tracing::debug!(task_id, "log stream attached");
    let state = StreamState {
        attachment: Attachment {
            hub,
            task_id: task_id.to_string(),
        },
        registry,
        notify,
        poll,
        pending: VecDeque::new(),
        ending: None,
        done: false,
    };
    Ok(Box::pin(stream::unfold(state, |mut state| async move {
        let frame = state.next_frame().await?;
        Some((frame, state))
    })))
}
