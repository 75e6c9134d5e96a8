// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The engine merge operator.
//!
//! Operands and the existing value are serialized [`Metadata`] records.
//! Time-series payloads merge associatively with a last-write-wins rule per
//! sample offset; any other framed value merges by payload concatenation.
//!
//! Merge commands can be replayed by the replication layer, so merges must
//! tolerate duplicate delivery. The time-series rule is idempotent under
//! replay; plain byte concatenation is not, which is why mixed value kinds
//! are refused rather than coerced.
//!
//! A failed merge is reported to the engine as unsuccessful, which causes it
//! to drop or corrupt the key. Merges are advisory; the failure does not
//! propagate to the writer.

use rocksdb::MergeOperands;
use tracing::warn;

use super::error::StorageError;
use super::value::{
    decode_time_series, encode_time_series_value, is_time_series_value, value_data_bytes, Metadata,
    TimeSeriesData, TimeSeriesSample,
};

/// Merge operator name persisted in the RocksDB manifest. Never change this.
pub const MERGE_OPERATOR_NAME: &str = "cockroach_merge_operator";

// Walks two offset-sorted sample sequences, emitting one sample per distinct
// offset. Among samples sharing an offset the last one encountered wins,
// with the right side scanned after the left.
fn merge_sorted_samples(
    left: &[TimeSeriesSample],
    right: &[TimeSeriesSample],
) -> Vec<TimeSeriesSample> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);

    while i < left.len() || j < right.len() {
        let next_offset = if i == left.len() {
            right[j].offset
        } else if j == right.len() {
            left[i].offset
        } else {
            left[i].offset.min(right[j].offset)
        };

        let mut src = None;
        while i < left.len() && left[i].offset == next_offset {
            src = Some(left[i]);
            i += 1;
        }
        while j < right.len() && right[j].offset == next_offset {
            src = Some(right[j]);
            j += 1;
        }
        if let Some(sample) = src {
            out.push(sample);
        }
    }
    out
}

// Merges the time-series payload of `right` into `left`. Both must share a
// start timestamp and sample duration. A partial merge concatenates the
// sample arrays; a full merge assumes the left side is already sorted, sorts
// the right side, and combines them with the last-wins rule.
fn merge_time_series_values(
    left: &mut Vec<u8>,
    right: &[u8],
    full_merge: bool,
) -> Result<(), StorageError> {
    let mut left_ts = decode_time_series(left)?;
    let mut right_ts = decode_time_series(right)?;

    if left_ts.start_timestamp_nanos != right_ts.start_timestamp_nanos {
        return Err(StorageError::MergeIncompatible(
            "mismatched time series start timestamps",
        ));
    }
    if left_ts.sample_duration_nanos != right_ts.sample_duration_nanos {
        return Err(StorageError::MergeIncompatible(
            "mismatched time series sample durations",
        ));
    }

    if !full_merge {
        left_ts.samples.append(&mut right_ts.samples);
        *left = encode_time_series_value(&left_ts)?;
        return Ok(());
    }

    right_ts.samples.sort_by_key(|s| s.offset);
    let merged = TimeSeriesData {
        start_timestamp_nanos: left_ts.start_timestamp_nanos,
        sample_duration_nanos: left_ts.sample_duration_nanos,
        samples: merge_sorted_samples(&left_ts.samples, &right_ts.samples),
    };
    *left = encode_time_series_value(&merged)?;
    Ok(())
}

// Sorts a single time-series payload and collapses duplicate offsets,
// keeping the last sample of each run. The single-value counterpart of a
// full merge, applied when the first operand lands on an empty key.
fn consolidate_time_series_value(val: &mut Vec<u8>) -> Result<(), StorageError> {
    let mut ts = decode_time_series(val)?;
    ts.samples.sort_by_key(|s| s.offset);

    let mut samples: Vec<TimeSeriesSample> = Vec::with_capacity(ts.samples.len());
    for sample in &ts.samples {
        match samples.last_mut() {
            Some(last) if last.offset == sample.offset => *last = *sample,
            _ => samples.push(*sample),
        }
    }
    ts.samples = samples;
    *val = encode_time_series_value(&ts)?;
    Ok(())
}

/// Folds `right` into `left`. Time-series payloads take the merge path
/// above; plain values append the right payload body to the left value.
/// Mixed kinds are refused.
pub fn merge_values(
    left: &mut Metadata,
    right: &Metadata,
    full_merge: bool,
) -> Result<(), StorageError> {
    match &mut left.raw_bytes {
        Some(left_raw) => {
            let Some(right_raw) = &right.raw_bytes else {
                return Err(StorageError::MergeIncompatible(
                    "inconsistent value types for merge (left = bytes, right = ?)",
                ));
            };
            if is_time_series_value(left_raw) || is_time_series_value(right_raw) {
                if !is_time_series_value(left_raw) || !is_time_series_value(right_raw) {
                    return Err(StorageError::MergeIncompatible(
                        "inconsistent value types for merging time series data",
                    ));
                }
                merge_time_series_values(left_raw, right_raw, full_merge)
            } else {
                left_raw.extend_from_slice(value_data_bytes(right_raw));
                Ok(())
            }
        }
        None => {
            left.raw_bytes = right.raw_bytes.clone();
            if right.merge_timestamp.is_some() {
                left.merge_timestamp = right.merge_timestamp;
            }
            if full_merge {
                if let Some(raw) = &mut left.raw_bytes {
                    if is_time_series_value(raw) {
                        consolidate_time_series_value(raw)?;
                    }
                }
            }
            Ok(())
        }
    }
}

fn merge_one(meta: &mut Metadata, operand: &[u8], full_merge: bool) -> Result<(), StorageError> {
    let operand_meta = Metadata::decode(operand)?;
    merge_values(meta, &operand_meta, full_merge)
}

/// Merges a single update into an existing serialized metadata value.
/// Used by the indexed-batch overlay to resolve merge records against the
/// base engine.
pub fn merge_one_value(existing: &[u8], update: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut meta = Metadata::decode(existing)?;
    let update_meta = Metadata::decode(update)?;
    merge_values(&mut meta, &update_meta, true)?;
    meta.encode()
}

/// Full-merge entry point registered with the engine.
pub(crate) fn full_merge(
    _key: &[u8],
    existing: Option<&[u8]>,
    operands: &MergeOperands,
) -> Option<Vec<u8>> {
    let mut meta = match existing {
        Some(bytes) => match Metadata::decode(bytes) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(error = %e, "corrupted existing value");
                return None;
            }
        },
        None => Metadata::default(),
    };

    for operand in operands.iter() {
        if let Err(e) = merge_one(&mut meta, operand, true) {
            warn!(error = %e, "full merge failed");
            return None;
        }
    }

    match meta.encode() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(error = %e, "merge serialization failed");
            None
        }
    }
}

/// Partial-merge entry point registered with the engine. Operands combine
/// without an existing value; time-series samples are concatenated and
/// consolidated by a later full merge.
pub(crate) fn partial_merge(
    _key: &[u8],
    _existing: Option<&[u8]>,
    operands: &MergeOperands,
) -> Option<Vec<u8>> {
    let mut meta = Metadata::default();

    for operand in operands.iter() {
        if let Err(e) = merge_one(&mut meta, operand, false) {
            warn!(error = %e, "partial merge failed");
            return None;
        }
    }

    match meta.encode() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(error = %e, "merge serialization failed");
            None
        }
    }
}
