//! In-memory infrastructure: the admission wait queue and per-task log storage.

pub mod log_hub;
pub mod wait_queue;

pub use log_hub::LogHub;
pub use wait_queue::{AdmissionTicket, WaitQueue};
