// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hybrid logical clock timestamps.

use serde::{Deserialize, Serialize};

/// An HLC timestamp: wall-clock nanoseconds since the Unix epoch plus a
/// logical counter that orders events sharing a wall time.
///
/// Timestamps are totally ordered by `(wall_time, logical)`. The zero
/// timestamp is distinguished: it keys MVCC metadata rows and never names a
/// real version.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub wall_time: i64,
    pub logical: i32,
}

impl Timestamp {
    /// The zero timestamp.
    pub const ZERO: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };

    /// Creates a timestamp from its parts.
    #[inline]
    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    /// Creates a timestamp from wall-clock nanoseconds with a zero logical
    /// component.
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self {
            wall_time: nanos,
            logical: 0,
        }
    }

    /// Returns true for the zero timestamp.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.wall_time == 0 && self.logical == 0
    }

    /// Returns the largest timestamp strictly smaller than this one.
    ///
    /// # Panics
    ///
    /// Panics on the zero timestamp, which has no predecessor.
    pub fn prev(&self) -> Timestamp {
        if self.logical > 0 {
            Timestamp::new(self.wall_time, self.logical - 1)
        } else if self.wall_time > 0 {
            Timestamp::new(self.wall_time - 1, i32::MAX)
        } else {
            panic!("no previous time for zero timestamp");
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.wall_time, self.logical)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..=i64::MAX / 2, 0i32..=i32::MAX)
            .prop_map(|(wall_time, logical)| Timestamp::new(wall_time, logical))
    }

    proptest! {
        #[test]
        fn prev_is_strictly_smaller(ts in arb_timestamp()) {
            prop_assume!(!ts.is_zero());
            prop_assert!(ts.prev() < ts);
        }

        #[test]
        fn prev_is_adjacent(ts in arb_timestamp()) {
            prop_assume!(ts.logical > 0);
            // With a positive logical component there is nothing between
            // prev and ts.
            let p = ts.prev();
            prop_assert_eq!(Timestamp::new(p.wall_time, p.logical + 1), ts);
        }

        #[test]
        fn ordering_matches_pair_ordering(a in arb_timestamp(), b in arb_timestamp()) {
            let expected = (a.wall_time, a.logical).cmp(&(b.wall_time, b.logical));
            prop_assert_eq!(a.cmp(&b), expected);
        }
    }
}
