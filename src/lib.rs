// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! BariumDB storage core: a multi-version, transactional key/value layer
//! over RocksDB, built as the storage substrate of a distributed SQL
//! database.
//!
//! The crate owns the MVCC key encoding and its comparator, the prefix
//! extractor feeding bloom filters, the merge operator for structured
//! records, indexed write batches with read-your-writes iteration, and the
//! MVCC scanner that resolves versions, write intents and clock
//! uncertainty.

pub mod storage;
pub mod time;

pub use storage::{
    mvcc_get, mvcc_scan, Batch, DurabilityMode, Engine, EngineCache, EngineConfig, EngineIter,
    EngineSnapshot, Handle, IterOpts, Metadata, MvccStats, OverlayIter, ScanResults, SstWriter,
    StorageError, TimeBounds, TxnInfo, TxnMeta, WriteOnlyBatch,
};
pub use time::{HlcClock, Timestamp};
