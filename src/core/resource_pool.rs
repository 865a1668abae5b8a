//! Device resource pool: per-device, per-kind concurrency accounting and
//! wait-and-notify admission.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::AdmissionPolicy;
use crate::core::device::{class_of, DeviceTopology};
use crate::core::error::OrchestratorError;
use crate::core::task::TaskKind;
use crate::infra::wait_queue::{AdmissionTicket, WaitQueue};
use crate::util::TaskId;

/// `device or class -> kind -> max concurrent`.
pub type LimitTable = BTreeMap<String, BTreeMap<TaskKind, u32>>;

/// `concrete device -> kind -> running count`.
pub type UsageTable = BTreeMap<String, BTreeMap<TaskKind, u32>>;

/// One task holding capacity on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEntry {
    /// Holder.
    pub task_id: TaskId,
    /// Kind the capacity was taken for.
    pub task_kind: TaskKind,
}

/// Read-only copy of the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Running counts per concrete device.
    pub usage: UsageTable,
    /// Holders per concrete device.
    pub active: BTreeMap<String, Vec<ActiveEntry>>,
    /// Configured limits.
    pub limits: LimitTable,
}

/// Result of waiting for admission.
#[derive(Debug)]
pub enum Admission {
    /// Capacity was allocated.
    Granted(Allocation),
    /// The cancellation predicate fired first; nothing was allocated.
    Cancelled,
}

struct Ledger {
    limits: LimitTable,
    usage: UsageTable,
    active: BTreeMap<String, Vec<ActiveEntry>>,
    waiters: WaitQueue,
}

impl Ledger {
    fn limit(&self, device: &str, kind: TaskKind) -> u32 {
        self.limits
            .get(device)
            .and_then(|m| m.get(&kind))
            .or_else(|| self.limits.get(class_of(device)).and_then(|m| m.get(&kind)))
            .copied()
            .unwrap_or(0)
    }

    fn used(&self, device: &str, kind: TaskKind) -> u32 {
        self.usage
            .get(device)
            .and_then(|m| m.get(&kind))
            .copied()
            .unwrap_or(0)
    }

    fn has_headroom(&self, device: &str, kind: TaskKind) -> bool {
        self.used(device, kind) < self.limit(device, kind)
    }

    fn held_by(&self, task_id: &str) -> Option<&str> {
        self.active.iter().find_map(|(device, entries)| {
            entries
                .iter()
                .any(|e| e.task_id == task_id)
                .then_some(device.as_str())
        })
    }

    /// Least-used member with headroom; first in topology order on ties.
    fn pick(&self, members: &[String], kind: TaskKind) -> Option<String> {
        members
            .iter()
            .filter(|d| self.has_headroom(d, kind))
            .min_by_key(|d| self.used(d, kind))
            .cloned()
    }

    fn commit(&mut self, device: &str, kind: TaskKind, task_id: &str) {
        *self
            .usage
            .entry(device.to_string())
            .or_default()
            .entry(kind)
            .or_insert(0) += 1;
        self.active
            .entry(device.to_string())
            .or_default()
            .push(ActiveEntry {
                task_id: task_id.to_string(),
                task_kind: kind,
            });
    }
}

/// Shared capacity ledger for all devices.
///
/// One `parking_lot::Mutex` guards the ledger; critical sections never
/// await. Waiters sleep on a [`Notify`] woken by release, limit updates and
/// cancellation, with the caller's backoff as a fallback re-check.
pub struct ResourcePool {
    topology: DeviceTopology,
    policy: AdmissionPolicy,
    ledger: Mutex<Ledger>,
    notify: Notify,
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("topology", &self.topology)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResourcePool {
    /// Create a pool with zeroed counters for every device in `topology`.
    #[must_use]
    pub fn new(topology: DeviceTopology, limits: LimitTable, policy: AdmissionPolicy) -> Self {
        let usage = topology
            .devices()
            .iter()
            .map(|d| {
                let per_kind = TaskKind::ALL
                    .into_iter()
                    .filter(|k| k.uses_pool())
                    .map(|k| (k, 0))
                    .collect();
                (d.clone(), per_kind)
            })
            .collect();
        let active = topology
            .devices()
            .iter()
            .map(|d| (d.clone(), Vec::new()))
            .collect();
        Self {
            topology,
            policy,
            ledger: Mutex::new(Ledger {
                limits,
                usage,
                active,
                waiters: WaitQueue::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Device layout the pool manages.
    #[must_use]
    pub const fn topology(&self) -> &DeviceTopology {
        &self.topology
    }

    /// Validate `device` and expand it to its concrete members.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownDevice`] when `device` is not in the topology.
    pub fn resolve_device(&self, device: &str) -> Result<Vec<String>, OrchestratorError> {
        self.topology.resolve(device)
    }

    /// Effective limit for a concrete device: its own entry, else its class entry, else 0.
    #[must_use]
    pub fn limit(&self, device: &str, kind: TaskKind) -> u32 {
        self.ledger.lock().limit(device, kind)
    }

    /// Running count for a concrete device.
    #[must_use]
    pub fn usage(&self, device: &str, kind: TaskKind) -> u32 {
        self.ledger.lock().used(device, kind)
    }

    /// Number of registered admission waiters.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.ledger.lock().waiters.len()
    }

    /// Whether `device` (concrete or class) has headroom for `kind`.
    ///
    /// Unknown devices report `false`.
    #[must_use]
    pub fn can_allocate(&self, device: &str, kind: TaskKind) -> bool {
        let Ok(members) = self.topology.resolve(device) else {
            return false;
        };
        let ledger = self.ledger.lock();
        members.iter().any(|d| ledger.has_headroom(d, kind))
    }

    /// Take one unit of `kind` capacity on `device` for `task_id`.
    ///
    /// For a class, picks the least-used member with headroom. A task that
    /// already holds an entry gets its held device back without another
    /// increment.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownDevice`] or
    /// [`OrchestratorError::CapacityExceeded`].
    pub fn allocate(
        &self,
        device: &str,
        kind: TaskKind,
        task_id: &str,
    ) -> Result<String, OrchestratorError> {
        let members = self.topology.resolve(device)?;
        let mut ledger = self.ledger.lock();
        if let Some(held) = ledger.held_by(task_id) {
            return Ok(held.to_string());
        }
        let Some(chosen) = ledger.pick(&members, kind) else {
            return Err(OrchestratorError::CapacityExceeded {
                device: device.to_string(),
                kind,
            });
        };
        ledger.commit(&chosen, kind, task_id);
        drop(ledger);
        tracing::info!(task_id, device = %chosen, %kind, "allocated");
        Ok(chosen)
    }

    /// Return `task_id`'s capacity on `device`.
    ///
    /// Idempotent: returns `false` and changes nothing when no matching
    /// entry exists. Always wakes admission waiters.
    pub fn release(&self, device: &str, kind: TaskKind, task_id: &str) -> bool {
        let released = {
            let mut ledger = self.ledger.lock();
            let removed = ledger.active.get_mut(device).and_then(|entries| {
                entries
                    .iter()
                    .position(|e| e.task_id == task_id && e.task_kind == kind)
                    .map(|idx| entries.remove(idx))
            });
            if removed.is_some() {
                if let Some(count) = ledger.usage.get_mut(device).and_then(|m| m.get_mut(&kind)) {
                    *count = count.saturating_sub(1);
                }
            }
            removed.is_some()
        };
        if released {
            tracing::info!(task_id, device, %kind, "released");
        } else {
            tracing::debug!(task_id, device, %kind, "release without matching allocation");
        }
        self.notify.notify_waiters();
        released
    }

    /// Copy of usage, holders and limits.
    #[must_use]
    pub fn status(&self) -> ResourceSnapshot {
        let ledger = self.ledger.lock();
        ResourceSnapshot {
            usage: ledger.usage.clone(),
            active: ledger.active.clone(),
            limits: ledger.limits.clone(),
        }
    }

    /// Deep-merge `partial` into the limits and wake waiters.
    pub fn update_limits(&self, partial: LimitTable) {
        {
            let mut ledger = self.ledger.lock();
            for (device, kinds) in partial {
                if self.topology.resolve(&device).is_err() {
                    tracing::warn!(device = %device, "limit set for device outside the topology");
                }
                let entry = ledger.limits.entry(device).or_default();
                entry.extend(kinds);
            }
        }
        tracing::info!("resource limits updated");
        self.notify.notify_waiters();
    }

    /// Wake every admission waiter so it re-checks capacity and cancellation.
    pub fn wake_waiters(&self) {
        self.notify.notify_waiters();
    }

    /// Check and allocate in one critical section.
    ///
    /// Under [`AdmissionPolicy::Priority`] the ticket is held back while a
    /// better-ranked registered waiter of the same kind could take one of
    /// the same devices.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownDevice`] when the ticket's device is invalid.
    pub fn try_admit(&self, ticket: &AdmissionTicket) -> Result<Option<String>, OrchestratorError> {
        let members = self.topology.resolve(&ticket.device)?;
        let mut ledger = self.ledger.lock();
        if let Some(held) = ledger.held_by(&ticket.task_id) {
            return Ok(Some(held.to_string()));
        }
        if self.policy == AdmissionPolicy::Priority
            && self.outranked(&ledger, ticket, &members)
        {
            return Ok(None);
        }
        let Some(chosen) = ledger.pick(&members, ticket.kind) else {
            return Ok(None);
        };
        ledger.commit(&chosen, ticket.kind, &ticket.task_id);
        Ok(Some(chosen))
    }

    fn outranked(&self, ledger: &Ledger, ticket: &AdmissionTicket, members: &[String]) -> bool {
        ledger
            .waiters
            .ahead_of(&ticket.task_id)
            .filter(|other| other.kind == ticket.kind)
            .any(|other| {
                self.topology
                    .resolve(&other.device)
                    .unwrap_or_default()
                    .iter()
                    .any(|d| members.contains(d) && ledger.has_headroom(d, ticket.kind))
            })
    }

    /// Wait until `ticket` is admitted, cancelled or timed out.
    ///
    /// Each iteration checks `is_cancelled` before trying to admit, so a
    /// cancelled waiter never allocates. `backoff` bounds the sleep between
    /// re-checks when no notification arrives.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownDevice`] for an invalid device and
    /// [`OrchestratorError::AllocationTimeout`] once `timeout` elapses.
    pub async fn acquire<F>(
        self: &Arc<Self>,
        ticket: AdmissionTicket,
        backoff: Duration,
        timeout: Option<Duration>,
        is_cancelled: F,
    ) -> Result<Admission, OrchestratorError>
    where
        F: Fn() -> bool,
    {
        self.topology.resolve(&ticket.device)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        self.ledger.lock().waiters.push(ticket.clone());
        let _waiter = WaiterGuard {
            pool: self,
            task_id: &ticket.task_id,
        };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if is_cancelled() {
                return Ok(Admission::Cancelled);
            }
            if let Some(device) = self.try_admit(&ticket)? {
                tracing::info!(task_id = %ticket.task_id, device = %device, kind = %ticket.kind, "admitted");
                return Ok(Admission::Granted(Allocation {
                    pool: Arc::clone(self),
                    device,
                    kind: ticket.kind,
                    task_id: ticket.task_id.clone(),
                    released: false,
                }));
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::warn!(task_id = %ticket.task_id, device = %ticket.device, "admission timed out");
                        return Err(OrchestratorError::AllocationTimeout {
                            task_id: ticket.task_id.clone(),
                            device: ticket.device.clone(),
                        });
                    }
                    backoff.min(deadline - now)
                }
                None => backoff,
            };
            tracing::debug!(task_id = %ticket.task_id, ?wait, "waiting for capacity");
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Withdraws a waiter and lets the next-ranked ones re-check.
struct WaiterGuard<'a> {
    pool: &'a ResourcePool,
    task_id: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let removed = self.pool.ledger.lock().waiters.remove(self.task_id);
        if removed.is_some() {
            self.pool.notify.notify_waiters();
        }
    }
}

/// Capacity held by one task; released exactly once, on drop at the latest.
///
/// Release uses the device chosen at admission.
#[derive(Debug)]
pub struct Allocation {
    pool: Arc<ResourcePool>,
    device: String,
    kind: TaskKind,
    task_id: TaskId,
    released: bool,
}

impl Allocation {
    /// Concrete device the task landed on.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Kind the capacity was taken for.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Release now instead of on drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.release(&self.device, self.kind, &self.task_id);
        }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.release_once();
    }
}
