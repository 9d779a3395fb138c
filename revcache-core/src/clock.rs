//! Time source used for recheck throttling.

use std::fmt::Debug;

use chrono::Utc;

use crate::Timestamp;

/// Source of the current time.
///
/// Datasets read the clock to decide whether a staleness check is due.
/// Injecting a clock keeps throttling deterministic under test.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}
