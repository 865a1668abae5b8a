//! Admission wait queue ordered by priority, FIFO within a priority.

use std::collections::{BTreeMap, HashMap};

use crate::core::task::TaskKind;
use crate::util::{Priority, TaskId};

/// A task waiting for capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionTicket {
    /// Task identifier.
    pub task_id: TaskId,
    /// Requested device or device class.
    pub device: String,
    /// Task kind being admitted.
    pub kind: TaskKind,
    /// Admission priority.
    pub priority: Priority,
}

impl AdmissionTicket {
    /// Build a ticket.
    pub fn new(
        task_id: impl Into<TaskId>,
        device: impl Into<String>,
        kind: TaskKind,
        priority: Priority,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            device: device.into(),
            kind,
            priority,
        }
    }
}

type Rank = (u8, u64);

/// Registered waiters keyed by `(priority, registration sequence)`.
///
/// Ordered map instead of a heap so waiters can withdraw from the middle.
#[derive(Debug, Default)]
pub struct WaitQueue {
    next_seq: u64,
    ranked: BTreeMap<Rank, AdmissionTicket>,
    index: HashMap<TaskId, Rank>,
}

impl WaitQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ticket. Re-registering the same task keeps its original rank.
    pub fn push(&mut self, ticket: AdmissionTicket) {
        if self.index.contains_key(&ticket.task_id) {
            return;
        }
        let rank = (ticket.priority.get(), self.next_seq);
        self.next_seq += 1;
        self.index.insert(ticket.task_id.clone(), rank);
        self.ranked.insert(rank, ticket);
    }

    /// Withdraw a task; returns the ticket when it was registered.
    pub fn remove(&mut self, task_id: &str) -> Option<AdmissionTicket> {
        let rank = self.index.remove(task_id)?;
        self.ranked.remove(&rank)
    }

    /// Tickets ranked strictly before `task_id`, best first.
    ///
    /// Empty when `task_id` is not registered.
    pub fn ahead_of<'a>(&'a self, task_id: &str) -> impl Iterator<Item = &'a AdmissionTicket> + 'a {
        let bound = self.index.get(task_id).copied();
        self.ranked
            .iter()
            .take_while(move |(rank, _)| bound.is_some_and(|b| **rank < b))
            .map(|(_, t)| t)
    }

    /// Tickets in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &AdmissionTicket> {
        self.ranked.values()
    }

    /// Number of waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    /// Whether nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}
