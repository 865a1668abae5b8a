//! Wall-clock helpers shared by the registry and the log pipeline.

use chrono::{DateTime, Utc};

/// Current UTC time.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

