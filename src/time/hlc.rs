// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hybrid Logical Clock (HLC) implementation.
//!
//! Combines physical time with a logical counter to provide strictly
//! increasing timestamps even when the physical clock stalls or jumps
//! backwards.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use super::Timestamp;

/// A monotonic hybrid-logical clock.
///
/// Each call to `now()` returns a timestamp strictly greater than every
/// previous one, even under concurrent access. When the physical clock has
/// not advanced past the last handed-out wall time, the logical counter is
/// bumped instead.
#[derive(Debug, Default)]
pub struct HlcClock {
    last: Mutex<Timestamp>,
}

impl HlcClock {
    /// Creates a clock starting from the current physical time.
    pub fn new() -> Self {
        Self::default()
    }

    fn physical_now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }

    /// Returns the next timestamp.
    pub fn now(&self) -> Timestamp {
        let physical = Self::physical_now();
        let mut last = self.last.lock();
        if physical > last.wall_time {
            *last = Timestamp::new(physical, 0);
        } else {
            last.logical += 1;
        }
        *last
    }

    /// Folds an observed remote timestamp into the clock and returns a
    /// timestamp greater than both the observation and all prior local
    /// timestamps.
    pub fn update(&self, observed: Timestamp) -> Timestamp {
        let physical = Self::physical_now();
        let mut last = self.last.lock();
        if physical > last.wall_time && physical > observed.wall_time {
            *last = Timestamp::new(physical, 0);
        } else if observed >= *last {
            *last = Timestamp::new(observed.wall_time, observed.logical + 1);
        } else {
            last.logical += 1;
        }
        *last
    }
}
