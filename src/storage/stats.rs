// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! MVCC statistics computation.
//!
//! Walks a key range and accounts every row into size, count and age
//! buckets: live data, historical versions awaiting GC, intents, and
//! store-local system keys. Version rows without a metadata row contribute
//! through an implicit metadata derived from the newest version.

use std::cmp::Ordering;

use crate::time::Timestamp;

use super::error::StorageError;
use super::iter::EngineIter;
use super::key::{decode_key, encode_key, mvcc_compare, MVCC_VERSION_TIMESTAMP_SIZE};
use super::keys::LOCAL_MAX;
use super::value::Metadata;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Accumulated MVCC statistics for a key range.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MvccStats {
    pub live_bytes: i64,
    pub key_bytes: i64,
    pub val_bytes: i64,
    pub intent_bytes: i64,
    pub live_count: i64,
    pub key_count: i64,
    pub val_count: i64,
    pub intent_count: i64,
    pub intent_age: i64,
    pub gc_bytes_age: i64,
    pub sys_bytes: i64,
    pub sys_count: i64,
    pub last_update_nanos: i64,
}

/// Whole seconds elapsed between two nanosecond timestamps.
///
/// Each side truncates to seconds before subtracting; converting through
/// floating point would yield different results.
pub fn age_factor(from_nanos: i64, to_nanos: i64) -> i64 {
    to_nanos / NANOS_PER_SECOND - from_nanos / NANOS_PER_SECOND
}

/// Computes MVCC statistics over `[start, end)` as of `now_nanos`.
pub fn compute_stats<I: EngineIter>(
    iter: &mut I,
    start: &[u8],
    end: &[u8],
    now_nanos: i64,
) -> Result<MvccStats, StorageError> {
    let mut stats = MvccStats::default();

    iter.seek(&encode_key(start, Timestamp::ZERO));
    let end_key = encode_key(end, Timestamp::ZERO);

    let mut meta = Metadata::default();
    let mut prev_key: Vec<u8> = Vec::new();
    let mut first = false;
    let mut accrue_gc_age_nanos: i64 = 0;

    while iter.valid() {
        let Some(key) = iter.key() else { break };
        if mvcc_compare(key, &end_key) != Ordering::Less {
            break;
        }
        let Some((decoded, ts)) = decode_key(key) else {
            return Err(StorageError::Corruption("unable to decode key".into()));
        };
        let decoded_key = decoded.to_vec();
        let value_len = iter.value().map(|v| v.len()).unwrap_or(0) as i64;

        let is_sys = decoded_key.as_slice() < LOCAL_MAX;
        let is_value = !ts.is_zero();
        let implicit_meta = is_value && decoded_key != prev_key;
        prev_key.clear();
        prev_key.extend_from_slice(&decoded_key);

        if implicit_meta {
            // No metadata row for this key; synthesize one from its newest
            // version.
            meta = Metadata {
                key_bytes: MVCC_VERSION_TIMESTAMP_SIZE as i64,
                val_bytes: value_len,
                deleted: value_len == 0,
                timestamp: Timestamp::from_nanos(ts.wall_time),
                ..Metadata::default()
            };
        }

        if !is_value || implicit_meta {
            let meta_key_size = decoded_key.len() as i64 + 1;
            let meta_val_size = if implicit_meta { 0 } else { value_len };
            let total_bytes = meta_key_size + meta_val_size;
            first = true;

            if !implicit_meta {
                let Some(value) = iter.value() else { break };
                meta = Metadata::decode(value)?;
            }

            if is_sys {
                stats.sys_bytes += total_bytes;
                stats.sys_count += 1;
            } else {
                if !meta.deleted {
                    stats.live_bytes += total_bytes;
                    stats.live_count += 1;
                } else {
                    stats.gc_bytes_age +=
                        total_bytes * age_factor(meta.timestamp.wall_time, now_nanos);
                }
                stats.key_bytes += meta_key_size;
                stats.val_bytes += meta_val_size;
                stats.key_count += 1;
                if meta.raw_bytes.is_some() {
                    stats.val_count += 1;
                }
            }
            if !implicit_meta {
                iter.next();
                continue;
            }
        }

        let total_bytes = value_len + MVCC_VERSION_TIMESTAMP_SIZE as i64;
        if is_sys {
            stats.sys_bytes += total_bytes;
        } else {
            if first {
                first = false;
                if !meta.deleted {
                    stats.live_bytes += total_bytes;
                } else {
                    stats.gc_bytes_age +=
                        total_bytes * age_factor(meta.timestamp.wall_time, now_nanos);
                }
                if meta.txn.is_some() {
                    stats.intent_bytes += total_bytes;
                    stats.intent_count += 1;
                    stats.intent_age += age_factor(meta.timestamp.wall_time, now_nanos);
                }
                if meta.key_bytes != MVCC_VERSION_TIMESTAMP_SIZE as i64 {
                    return Err(StorageError::Corruption(format!(
                        "expected mvcc metadata key bytes to equal {}; got {}",
                        MVCC_VERSION_TIMESTAMP_SIZE, meta.key_bytes
                    )));
                }
                if meta.val_bytes != value_len {
                    return Err(StorageError::Corruption(format!(
                        "expected mvcc metadata val bytes to equal {}; got {}",
                        value_len, meta.val_bytes
                    )));
                }
                accrue_gc_age_nanos = meta.timestamp.wall_time;
            } else {
                // Older versions age from the timestamp that superseded
                // them; tombstones age from their own write time.
                let is_tombstone = value_len == 0;
                if is_tombstone {
                    stats.gc_bytes_age += total_bytes * age_factor(ts.wall_time, now_nanos);
                } else {
                    debug_assert!(accrue_gc_age_nanos > 0);
                    stats.gc_bytes_age += total_bytes * age_factor(accrue_gc_age_nanos, now_nanos);
                }
                accrue_gc_age_nanos = ts.wall_time;
            }
            stats.key_bytes += MVCC_VERSION_TIMESTAMP_SIZE as i64;
            stats.val_bytes += value_len;
            stats.val_count += 1;
        }
        iter.next();
    }
    iter.status()?;

    stats.last_update_nanos = now_nanos;
    Ok(stats)
}
