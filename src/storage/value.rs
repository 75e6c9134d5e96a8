// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Stored value framing and the structured records the engine interprets.
//!
//! A framed value is `<crc32:4><tag:1><payload>`. The engine treats most
//! values as opaque; the merge operator and the stats pass interpret two
//! shapes:
//!
//! - [`Metadata`]: the record stored at a key's zero-timestamp row. Inline
//!   values live in `raw_bytes`; a populated `txn` marks a write intent.
//! - [`TimeSeriesData`]: the payload of a [`ValueTag::TimeSeries`] framed
//!   value, merged associatively by the merge operator.
//!
//! Records serialize with bincode; that byte form is the stable on-disk
//! format.

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

use super::error::StorageError;

/// Size of the leading checksum in a framed value.
pub const CHECKSUM_SIZE: usize = 4;

/// Offset of the tag byte.
pub const TAG_POS: usize = CHECKSUM_SIZE;

/// Total framed-value header size.
pub const HEADER_SIZE: usize = TAG_POS + 1;

/// Value kinds carried in the tag byte of a framed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueTag {
    Unknown = 0,
    Bytes = 1,
    TimeSeries = 2,
}

impl From<u8> for ValueTag {
    fn from(b: u8) -> Self {
        match b {
            1 => ValueTag::Bytes,
            2 => ValueTag::TimeSeries,
            _ => ValueTag::Unknown,
        }
    }
}

/// Returns the tag of a framed value, `Unknown` for values too short to
/// carry a header.
pub fn value_tag(val: &[u8]) -> ValueTag {
    if val.len() < HEADER_SIZE {
        ValueTag::Unknown
    } else {
        ValueTag::from(val[TAG_POS])
    }
}

/// Returns the payload of a framed value, empty for values too short to
/// carry a header.
pub fn value_data_bytes(val: &[u8]) -> &[u8] {
    if val.len() < HEADER_SIZE {
        &[]
    } else {
        &val[HEADER_SIZE..]
    }
}

/// Returns true if the framed value carries a time-series payload.
pub fn is_time_series_value(val: &[u8]) -> bool {
    value_tag(val) == ValueTag::TimeSeries
}

/// Frames a payload with its tag and a crc32 over the tag and payload.
///
/// The checksum is advisory: values produced by byte-wise merge
/// concatenation do not carry a recomputed checksum.
pub fn build_value(tag: ValueTag, payload: &[u8]) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[tag as u8]);
    hasher.update(payload);

    let mut val = Vec::with_capacity(HEADER_SIZE + payload.len());
    val.extend_from_slice(&hasher.finalize().to_be_bytes());
    val.push(tag as u8);
    val.extend_from_slice(payload);
    val
}

/// Transaction identity carried by a write intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxnMeta {
    pub id: Vec<u8>,
    pub epoch: u32,
    pub timestamp: Timestamp,
}

/// The record stored at a key's zero-timestamp (metadata) row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Timestamp of the most recent version, or the intent's provisional
    /// timestamp.
    pub timestamp: Timestamp,
    /// True when the most recent version is a deletion tombstone.
    pub deleted: bool,
    /// Encoded-key bytes charged to the most recent version.
    pub key_bytes: i64,
    /// Value bytes charged to the most recent version.
    pub val_bytes: i64,
    /// Inline framed value; set for merged (non-versioned) rows.
    pub raw_bytes: Option<Vec<u8>>,
    /// Timestamp of the latest merge folded into `raw_bytes`.
    pub merge_timestamp: Option<Timestamp>,
    /// Present iff this metadata row is a write intent.
    pub txn: Option<TxnMeta>,
}

impl Metadata {
    /// Builds the metadata shape used as a merge operand: an inline value
    /// and an optional merge timestamp, nothing else.
    pub fn from_raw_bytes(raw_bytes: Vec<u8>) -> Metadata {
        Metadata {
            raw_bytes: Some(raw_bytes),
            ..Metadata::default()
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Metadata, StorageError> {
        bincode::deserialize(bytes)
            .map_err(|e| StorageError::Corruption(format!("unable to decode metadata: {e}")))
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(self)?)
    }
}

/// A single time-series sample at an offset from the collection's start
/// timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesSample {
    pub offset: i32,
    pub count: u32,
    pub sum: f64,
    pub max: Option<f64>,
    pub min: Option<f64>,
}

impl TimeSeriesSample {
    pub fn new(offset: i32, sum: f64) -> TimeSeriesSample {
        TimeSeriesSample {
            offset,
            count: 1,
            sum,
            max: None,
            min: None,
        }
    }
}

/// A collection of samples sharing a start timestamp and sample duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesData {
    pub start_timestamp_nanos: i64,
    pub sample_duration_nanos: i64,
    pub samples: Vec<TimeSeriesSample>,
}

/// Decodes the time-series payload of a framed value.
pub fn decode_time_series(val: &[u8]) -> Result<TimeSeriesData, StorageError> {
    if val.len() < HEADER_SIZE {
        return Err(StorageError::Corruption(
            "value too short for header".to_string(),
        ));
    }
    bincode::deserialize(value_data_bytes(val))
        .map_err(|e| StorageError::Corruption(format!("unable to decode time series data: {e}")))
}

/// Frames a time-series collection as a tagged value.
pub fn encode_time_series_value(ts: &TimeSeriesData) -> Result<Vec<u8>, StorageError> {
    Ok(build_value(ValueTag::TimeSeries, &bincode::serialize(ts)?))
}
