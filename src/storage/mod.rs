// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! MVCC storage layer over RocksDB.
//!
//! This module provides the multi-version, transactional key/value core
//! used beneath a distributed SQL database:
//!
//! - a key codec interleaving user keys with HLC timestamps while keeping
//!   the store's lexicographic layout useful ([`key`]);
//! - the comparator and prefix extractor that order those keys and drive
//!   prefix bloom filters ([`key`], wired up by [`Engine`]);
//! - an associative merge operator for structured records, in particular
//!   time-series samples ([`merge_values`]);
//! - indexed write batches with read-your-writes overlay iteration
//!   ([`Batch`], [`OverlayIter`]);
//! - the MVCC scanner resolving versions, intents and uncertainty
//!   ([`mvcc_scan`], [`mvcc_get`]);
//! - auxiliary passes: statistics, split-key selection, SST construction
//!   and ingestion, ranged compaction.
//!
//! # Example
//!
//! ```no_run
//! use bariumdb::storage::{mvcc_scan, Engine, EngineConfig, IterOpts};
//! use bariumdb::time::Timestamp;
//!
//! let engine = Engine::open("/tmp/mvcc", EngineConfig::default()).unwrap();
//!
//! // Two versions of one key.
//! engine.put(b"a", Timestamp::new(10, 0), b"x").unwrap();
//! engine.put(b"a", Timestamp::new(20, 0), b"y").unwrap();
//!
//! // A scan at wall time 15 sees the first version.
//! let mut iter = engine.new_iter(IterOpts::default()).unwrap();
//! let results =
//!     mvcc_scan(&mut iter, b"a", b"b", Timestamp::new(15, 0), 100, None, true, false).unwrap();
//! assert_eq!(results.kvs.len(), 1);
//! ```

mod batch;
mod engine;
mod error;
mod iter;
pub mod key;
pub mod keys;
mod merge;
mod overlay;
mod props;
mod scanner;
mod split;
mod sst;
mod stats;
mod value;

pub use batch::{Batch, BatchIter, BatchOp, WriteOnlyBatch};
pub use engine::{
    DurabilityMode, Engine, EngineCache, EngineConfig, EngineSnapshot, EngineStats, Handle,
    SstInfo,
};
pub use error::StorageError;
pub use iter::{EngineIter, IterOpts, RawIter};
pub use merge::{merge_one_value, merge_values, MERGE_OPERATOR_NAME};
pub use overlay::{Getter, OverlayIter};
pub use props::{
    encode_timestamp_full, TimeBoundCollector, TimeBoundRegistry, TimeBounds, PROP_TS_MAX,
    PROP_TS_MIN,
};
pub use scanner::{mvcc_get, mvcc_scan, ScanResults, TxnInfo};
pub use split::find_split_key;
pub use sst::{sst_writer_options, SstWriter};
pub use stats::{age_factor, compute_stats, MvccStats};
pub use value::{
    build_value, decode_time_series, encode_time_series_value, is_time_series_value,
    value_data_bytes, value_tag, Metadata, TimeSeriesData, TimeSeriesSample, TxnMeta, ValueTag,
};
