//! Interval-based duration accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Accumulated time plus an optional open interval.
///
/// `touch_in` opens an interval, `touch_out` folds it into the total. A
/// second `touch_in` while an interval is open is ignored so the running
/// interval keeps its original start; a `touch_out` with no open interval
/// does nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationClock {
    accumulated_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interval_start: Option<DateTime<Utc>>,
}

impl DurationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an interval at `now`. Returns `false` if one was already open.
    pub fn touch_in(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.interval_start {
            warn!(%start, %now, "clock already running, ignoring touch-in");
            return false;
        }
        self.interval_start = Some(now);
        true
    }

    /// Close the open interval, returning the milliseconds it added.
    pub fn touch_out(&mut self, now: DateTime<Utc>) -> i64 {
        let Some(start) = self.interval_start.take() else {
            return 0;
        };
        let elapsed = (now - start).num_milliseconds();
        if elapsed < 0 {
            warn!(%start, %now, "clock touched out before its interval start");
            return 0;
        }
        self.accumulated_ms += elapsed;
        elapsed
    }

    /// Fold the open interval and reopen it at `now`. No-op when stopped.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if self.interval_start.is_some() {
            self.touch_out(now);
            self.interval_start = Some(now);
        }
    }

    pub fn is_running(&self) -> bool {
        self.interval_start.is_some()
    }

    pub fn interval_start(&self) -> Option<DateTime<Utc>> {
        self.interval_start
    }

    pub fn accumulated_ms(&self) -> i64 {
        self.accumulated_ms
    }

    /// Accumulated time plus the open interval up to `now`.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        let open = self
            .interval_start
            .map(|start| (now - start).num_milliseconds().max(0))
            .unwrap_or(0);
        self.accumulated_ms + open
    }

    /// Accumulated seconds, excluding any open interval.
    pub fn seconds(&self) -> f64 {
        self.accumulated_ms as f64 / 1000.0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
