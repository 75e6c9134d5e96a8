// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-SST MVCC timestamp bounds.
//!
//! While an SST is being built, a [`TimeBoundCollector`] observes every key
//! and records the minimum and maximum version timestamps it contains. A
//! read constrained to a time range can then skip SSTs whose bounds do not
//! overlap the request.
//!
//! Bounds are stored as raw big-endian timestamp bytes under the property
//! keys `crdb.ts.min` / `crdb.ts.max` and compared lexicographically. That
//! comparison is only numerically exact when every recorded timestamp uses
//! the same width, so both recorded and requested timestamps are normalized
//! to the full 12-byte encoding.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::time::Timestamp;

use super::key::split_key;

/// SST property key for the smallest contained version timestamp. Persisted
/// in SST metadata; never change.
pub const PROP_TS_MIN: &str = "crdb.ts.min";

/// SST property key for the largest contained version timestamp. Persisted
/// in SST metadata; never change.
pub const PROP_TS_MAX: &str = "crdb.ts.max";

/// Encodes a timestamp as the full 12-byte big-endian form, including a zero
/// logical component.
pub fn encode_timestamp_full(ts: Timestamp) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[..8].copy_from_slice(&(ts.wall_time as u64).to_be_bytes());
    out[8..].copy_from_slice(&(ts.logical as u32).to_be_bytes());
    out
}

// Normalizes a raw timestamp section (8 or 12 bytes, NUL prefix already
// stripped) to the 12-byte form.
fn normalize_timestamp_bytes(ts: &[u8]) -> Option<[u8; 12]> {
    let mut out = [0u8; 12];
    match ts.len() {
        8 => out[..8].copy_from_slice(ts),
        12 => out.copy_from_slice(ts),
        _ => return None,
    }
    Some(out)
}

/// The timestamp bounds of one SST. Missing bounds mean the SST carried no
/// versioned keys, or predates bounds collection; such SSTs are never
/// filtered out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeBounds {
    pub ts_min: Option<[u8; 12]>,
    pub ts_max: Option<[u8; 12]>,
}

impl TimeBounds {
    /// True iff a read over `[min, max]` may need this SST. SSTs with
    /// missing bounds are always included.
    pub fn overlaps(&self, min: &[u8; 12], max: &[u8; 12]) -> bool {
        let (Some(ts_min), Some(ts_max)) = (&self.ts_min, &self.ts_max) else {
            return true;
        };
        max >= ts_min && min <= ts_max
    }
}

/// Observes the keys added to an SST and accumulates their timestamp
/// bounds. Best effort: keys without a well-formed timestamp section are
/// ignored.
#[derive(Debug, Default)]
pub struct TimeBoundCollector {
    ts_min: Option<[u8; 12]>,
    ts_max: Option<[u8; 12]>,
}

impl TimeBoundCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one encoded MVCC key into the bounds.
    pub fn add(&mut self, encoded_key: &[u8]) {
        let Some((_, ts)) = split_key(encoded_key) else {
            return;
        };
        if ts.is_empty() {
            return;
        }
        let Some(ts) = normalize_timestamp_bytes(&ts[1..]) else {
            return;
        };
        match &self.ts_max {
            Some(max) if ts <= *max => {}
            _ => self.ts_max = Some(ts),
        }
        match &self.ts_min {
            Some(min) if ts >= *min => {}
            _ => self.ts_min = Some(ts),
        }
    }

    /// Finishes collection, yielding the SST's properties.
    pub fn finish(self) -> TimeBounds {
        TimeBounds {
            ts_min: self.ts_min,
            ts_max: self.ts_max,
        }
    }
}

/// Known time bounds of SSTs the engine has built or ingested, keyed by file
/// name. SSTs absent from the registry behave as if their properties were
/// missing.
#[derive(Debug, Default)]
pub struct TimeBoundRegistry {
    inner: RwLock<HashMap<String, TimeBounds>>,
}

impl TimeBoundRegistry {
    pub fn record(&self, file: impl Into<String>, bounds: TimeBounds) {
        self.inner.write().insert(file.into(), bounds);
    }

    pub fn get(&self, file: &str) -> Option<TimeBounds> {
        self.inner.read().get(file).copied()
    }

    /// Returns all recorded per-file bounds.
    pub fn snapshot(&self) -> Vec<(String, TimeBounds)> {
        let mut all: Vec<_> = self
            .inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// True iff every one of `files` has recorded bounds and none of them
    /// overlap `[min, max]`. Unknown files count as overlapping.
    pub fn all_excluded(&self, files: &[String], min: &[u8; 12], max: &[u8; 12]) -> bool {
        let inner = self.inner.read();
        files.iter().all(|file| match inner.get(file) {
            Some(bounds) => !bounds.overlaps(min, max),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::key::encode_key;

    #[test]
    fn test_collector_tracks_bounds() {
        let mut collector = TimeBoundCollector::new();
        collector.add(&encode_key(b"a", Timestamp::new(20, 0)));
        collector.add(&encode_key(b"b", Timestamp::new(5, 3)));
        collector.add(&encode_key(b"c", Timestamp::new(10, 0)));
        // Metadata keys carry no timestamp and are ignored.
        collector.add(&encode_key(b"d", Timestamp::ZERO));

        let bounds = collector.finish();
        assert_eq!(bounds.ts_min, Some(encode_timestamp_full(Timestamp::new(5, 3))));
        assert_eq!(bounds.ts_max, Some(encode_timestamp_full(Timestamp::new(20, 0))));
    }

    #[test]
    fn test_collector_normalizes_widths() {
        // (10, 0) encodes as 8 bytes on disk, (10, 1) as 12. Normalization
        // keeps their comparison numeric.
        let mut collector = TimeBoundCollector::new();
        collector.add(&encode_key(b"a", Timestamp::new(10, 1)));
        collector.add(&encode_key(b"b", Timestamp::new(10, 0)));

        let bounds = collector.finish();
        assert_eq!(bounds.ts_min, Some(encode_timestamp_full(Timestamp::new(10, 0))));
        assert_eq!(bounds.ts_max, Some(encode_timestamp_full(Timestamp::new(10, 1))));
    }

    #[test]
    fn test_empty_collector_has_no_bounds() {
        let bounds = TimeBoundCollector::new().finish();
        assert_eq!(bounds, TimeBounds::default());
        // And missing bounds always overlap.
        assert!(bounds.overlaps(
            &encode_timestamp_full(Timestamp::new(1, 0)),
            &encode_timestamp_full(Timestamp::new(2, 0)),
        ));
    }

    #[test]
    fn test_overlap_predicate() {
        let bounds = TimeBounds {
            ts_min: Some(encode_timestamp_full(Timestamp::new(10, 0))),
            ts_max: Some(encode_timestamp_full(Timestamp::new(20, 0))),
        };
        let ts = |wall| encode_timestamp_full(Timestamp::new(wall, 0));

        assert!(bounds.overlaps(&ts(5), &ts(15)));
        assert!(bounds.overlaps(&ts(15), &ts(25)));
        assert!(bounds.overlaps(&ts(5), &ts(25)));
        assert!(bounds.overlaps(&ts(20), &ts(30)));
        assert!(bounds.overlaps(&ts(5), &ts(10)));
        assert!(!bounds.overlaps(&ts(21), &ts(30)));
        assert!(!bounds.overlaps(&ts(1), &ts(9)));
    }

    #[test]
    fn test_registry_exclusion() {
        let registry = TimeBoundRegistry::default();
        let ts = |wall| encode_timestamp_full(Timestamp::new(wall, 0));

        registry.record(
            "000001.sst",
            TimeBounds {
                ts_min: Some(ts(10)),
                ts_max: Some(ts(20)),
            },
        );

        let files = vec!["000001.sst".to_string()];
        assert!(registry.all_excluded(&files, &ts(30), &ts(40)));
        assert!(!registry.all_excluded(&files, &ts(15), &ts(40)));

        // Unknown files must be treated as overlapping.
        let with_unknown = vec!["000001.sst".to_string(), "000002.sst".to_string()];
        assert!(!registry.all_excluded(&with_unknown, &ts(30), &ts(40)));
    }
}
