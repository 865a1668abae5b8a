//! Identifier and priority primitives shared across the crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task identifier. Caller-supplied or a generated UUIDv4 string.
pub type TaskId = String;

/// Return `custom` when supplied, otherwise a fresh UUIDv4.
#[must_use]
pub fn generate_task_id(custom: Option<&str>) -> TaskId {
    match custom {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

/// Task priority in `1..=10`. Lower numbers rank first.
///
/// `Ord` follows the numeric value, so the "best" priority is the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Highest rank (1).
    pub const HIGHEST: Self = Self(1);
    /// Lowest rank (10).
    pub const LOWEST: Self = Self(10);

    /// Build a priority, rejecting values outside `1..=10`.
    ///
    /// # Errors
    ///
    /// Returns a message when `value` is out of range.
    pub fn new(value: u8) -> Result<Self, String> {
        if (Self::HIGHEST.0..=Self::LOWEST.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("priority must be within 1..=10, got {value}"))
        }
    }

    /// Numeric value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
