// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed storage engine.
//!
//! [`Engine`] owns the database handle and configures the MVCC layer's
//! engine contract: the custom comparator, prefix extractor, merge operator,
//! prefix bloom filters, and the compaction/level shape tuned for MVCC data.
//! Reads and writes take user keys plus timestamps and speak encoded MVCC
//! keys to the database.
//!
//! [`Handle`] is the dynamic face over the engine, a snapshot, and the two
//! batch kinds, returning `Unsupported` where an operation does not apply.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::statistics::Ticker;
use rocksdb::{
    BlockBasedOptions, BottommostLevelCompaction, Cache, CompactOptions, DBWithThreadMode,
    IngestExternalFileOptions, MultiThreaded, Options, SliceTransform, SnapshotWithThreadMode,
    WriteBatch, WriteOptions,
};
use tracing::{debug, info};

use crate::time::Timestamp;

use super::batch::{Batch, BatchOp, WriteOnlyBatch};
use super::error::StorageError;
use super::iter::{EngineIter, IterOpts, RawIter};
use super::key::{
    encode_key, key_prefix, mvcc_compare, prefix_in_domain, COMPARATOR_NAME, PREFIX_EXTRACTOR_NAME,
};
use super::merge::{full_merge, partial_merge, MERGE_OPERATOR_NAME};
use super::props::{encode_timestamp_full, TimeBoundRegistry, TimeBounds};

pub(crate) type Db = DBWithThreadMode<MultiThreaded>;

const WRITE_BUFFER_SIZE: usize = 64 << 20;
const COMPACTION_TARGET_SIZE: u64 = 128 << 20;
// The options baseline keeps the RocksDB default level count.
const NUM_LEVELS: i32 = 7;

/// Durability mode for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Writes reach the WAL but are not fsynced. Durable against process
    /// crashes but not power failures.
    #[default]
    WalOnly,
    /// Every write fsyncs. Durable against power failures but slower.
    FsyncEveryWrite,
}

struct CacheState {
    cache: Cache,
    capacity: usize,
}

/// A block cache shared between engines. Each engine opened against it
/// deducts one write buffer's worth of capacity, keeping total memory use
/// stable as engines come and go.
pub struct EngineCache {
    state: Mutex<CacheState>,
}

impl EngineCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                cache: Cache::new_lru_cache(capacity),
                capacity,
            }),
        }
    }

    fn reserve(&self, bytes: usize) -> Cache {
        let mut state = self.state.lock();
        state.capacity = state.capacity.saturating_sub(bytes);
        let capacity = state.capacity;
        state.cache.set_capacity(capacity);
        state.cache.clone()
    }
}

/// Engine construction knobs. The interesting options are fixed by the
/// baseline in `build_options`; these are the per-deployment ones.
pub struct EngineConfig {
    pub cache: Option<Arc<EngineCache>>,
    pub block_size: usize,
    pub max_open_files: i32,
    pub num_cpu: usize,
    pub durability: DurabilityMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: None,
            block_size: 32 << 10,
            max_open_files: -1,
            num_cpu: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            durability: DurabilityMode::default(),
        }
    }
}

/// Operational statistics exported by the engine.
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub block_cache_hits: u64,
    pub block_cache_misses: u64,
    pub block_cache_usage: usize,
    pub block_cache_pinned_usage: usize,
    pub bloom_filter_prefix_checked: u64,
    pub bloom_filter_prefix_useful: u64,
    pub memtable_total_size: u64,
    pub table_readers_mem_estimate: u64,
    pub pending_compaction_bytes_estimate: u64,
}

/// Live-SST metadata with its key range decoded to MVCC keys.
#[derive(Debug, Clone)]
pub struct SstInfo {
    pub name: String,
    pub level: i32,
    pub size: usize,
    pub start_key: Option<(Vec<u8>, Timestamp)>,
    pub end_key: Option<(Vec<u8>, Timestamp)>,
}

/// The RocksDB-backed MVCC storage engine.
pub struct Engine {
    db: Db,
    opts: Options,
    cache: Option<Cache>,
    write_opts: WriteOptions,
    sync_write_opts: WriteOptions,
    registry: TimeBoundRegistry,
}

impl Engine {
    /// Opens or creates an engine at `path`.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Engine, StorageError> {
        let path = path.as_ref();
        let (opts, cache) = Self::build_options(&config);
        let db = Db::open(&opts, path)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(config.durability == DurabilityMode::FsyncEveryWrite);
        let mut sync_write_opts = WriteOptions::default();
        sync_write_opts.set_sync(true);

        info!(path = %path.display(), "opened storage engine");
        Ok(Engine {
            db,
            opts,
            cache,
            write_opts,
            sync_write_opts,
            registry: TimeBoundRegistry::default(),
        })
    }

    fn build_options(config: &EngineConfig) -> (Options, Option<Cache>) {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        // Compactions and flushes fight each other below two threads.
        opts.increase_parallelism(config.num_cpu.max(2) as i32);
        opts.set_max_subcompactions((config.num_cpu / 2).max(1) as u32);
        opts.set_comparator(COMPARATOR_NAME, Box::new(|a, b| mvcc_compare(a, b)));
        opts.set_merge_operator(MERGE_OPERATOR_NAME, full_merge, partial_merge);
        opts.set_prefix_extractor(SliceTransform::create(
            PREFIX_EXTRACTOR_NAME,
            key_prefix,
            Some(prefix_in_domain),
        ));
        opts.enable_statistics();
        opts.set_max_open_files(config.max_open_files);
        // Smooth out disk usage rather than letting the OS flush in bursts.
        opts.set_wal_bytes_per_sync(512 << 10);
        opts.set_bytes_per_sync(512 << 10);
        // No bloom filters for the bottom-most level; they would cost 10x
        // the memory for the last few percent of benefit.
        opts.set_optimize_filters_for_hits(true);
        opts.set_stats_dump_period_sec(0);

        opts.set_write_buffer_size(WRITE_BUFFER_SIZE);
        // Peak setting; bursts (e.g. a large range deletion) should not
        // stall writes.
        opts.set_max_write_buffer_number(4);
        opts.set_min_write_buffer_number_to_merge(1);
        // Move files out of L0 quickly, each one adds read amplification.
        opts.set_level_zero_file_num_compaction_trigger(2);
        opts.set_level_zero_slowdown_writes_trigger(20);
        opts.set_level_zero_stop_writes_trigger(32);
        opts.set_level_compaction_dynamic_level_bytes(true);
        opts.set_max_bytes_for_level_base(64 << 20);
        opts.set_max_bytes_for_level_multiplier(10.0);
        // level-size  file-size  max-files
        //   L1:      64 MB       4 MB         16
        //   L2:     640 MB       8 MB         80
        //   ...
        //   L6:     6.1 TB     128 MB      50000
        opts.set_target_file_size_base(4 << 20);
        opts.set_target_file_size_multiplier(2);

        let mut table = BlockBasedOptions::default();
        let cache = config.cache.as_ref().map(|c| {
            // Reserve one memtable's worth of memory from the shared cache.
            let cache = c.reserve(WRITE_BUFFER_SIZE);
            table.set_block_cache(&cache);
            cache
        });
        // Full-file filter: consulted before the index, one lookup saved.
        table.set_bloom_filter(10.0, false);
        table.set_whole_key_filtering(false);
        table.set_format_version(2);
        table.set_block_size(config.block_size);
        opts.set_block_based_table_factory(&table);

        (opts, cache)
    }

    pub fn put(&self, key: &[u8], ts: Timestamp, value: &[u8]) -> Result<(), StorageError> {
        self.db
            .put_opt(encode_key(key, ts), value, &self.write_opts)?;
        Ok(())
    }

    pub fn merge(&self, key: &[u8], ts: Timestamp, value: &[u8]) -> Result<(), StorageError> {
        self.db
            .merge_opt(encode_key(key, ts), value, &self.write_opts)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8], ts: Timestamp) -> Result<(), StorageError> {
        self.db.delete_opt(encode_key(key, ts), &self.write_opts)?;
        Ok(())
    }

    /// Writes a range tombstone over `[start, end)`.
    pub fn delete_range(&self, start: &[u8], end: &[u8], ts: Timestamp) -> Result<(), StorageError> {
        let mut wb = WriteBatch::default();
        wb.delete_range(encode_key(start, ts), encode_key(end, ts));
        self.db.write_opt(wb, &self.write_opts)?;
        Ok(())
    }

    /// Deletes every key in `[start, end)` individually, driving the
    /// supplied iterator.
    pub fn delete_iter_range(
        &self,
        iter: &mut RawIter<'_>,
        start: &[u8],
        end: &[u8],
    ) -> Result<(), StorageError> {
        iter.seek(&encode_key(start, Timestamp::ZERO));
        let end_key = encode_key(end, Timestamp::ZERO);
        while iter.valid() {
            let Some(key) = iter.key() else { break };
            if mvcc_compare(key, &end_key) != std::cmp::Ordering::Less {
                break;
            }
            let key = key.to_vec();
            self.db.delete_opt(&key, &self.write_opts)?;
            iter.next();
        }
        iter.status()
    }

    /// Reads the value at exactly `(key, ts)`. Missing keys read as `None`.
    pub fn get(&self, key: &[u8], ts: Timestamp) -> Result<Option<Vec<u8>>, StorageError> {
        self.get_raw(&encode_key(key, ts))
    }

    pub(crate) fn get_raw(&self, encoded: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(encoded)?)
    }

    pub(crate) fn apply_ops(&self, ops: &[BatchOp], sync: bool) -> Result<(), StorageError> {
        let mut wb = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => wb.put(key, value),
                BatchOp::Merge { key, value } => wb.merge(key, value),
                BatchOp::Delete { key } => wb.delete(key),
                BatchOp::DeleteRange { start, end } => wb.delete_range(start, end),
            }
        }
        let write_opts = if sync {
            &self.sync_write_opts
        } else {
            &self.write_opts
        };
        self.db.write_opt(wb, write_opts)?;
        Ok(())
    }

    /// Applies a serialized batch representation directly.
    pub fn apply_batch_repr(&self, repr: &[u8], sync: bool) -> Result<(), StorageError> {
        let ops: Vec<BatchOp> = bincode::deserialize(repr)
            .map_err(|e| StorageError::Corruption(format!("unable to decode batch repr: {e}")))?;
        self.apply_ops(&ops, sync)
    }

    /// Starts an indexed (read-your-writes) batch.
    pub fn new_batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    /// Starts an unindexed, write-only batch.
    pub fn new_write_only_batch(&self) -> WriteOnlyBatch<'_> {
        WriteOnlyBatch::new(self)
    }

    /// Pins a point-in-time view of the engine.
    pub fn snapshot(&self) -> EngineSnapshot<'_> {
        EngineSnapshot {
            engine: self,
            snap: self.db.snapshot(),
        }
    }

    /// Opens an iterator over the engine. A time-bound iterator skips all
    /// data when every live SST has recorded bounds outside the requested
    /// range; unknown SSTs always count as relevant.
    pub fn new_iter(&self, opts: IterOpts) -> Result<RawIter<'_>, StorageError> {
        let iter = self.db.raw_iterator_opt(opts.read_options());
        if let Some((min, max)) = opts.time_bounds {
            let min = encode_timestamp_full(min);
            let max = encode_timestamp_full(max);
            let files: Vec<String> = self
                .db
                .live_files()?
                .into_iter()
                .map(|f| f.name)
                .collect();
            if !files.is_empty() && self.registry.all_excluded(&files, &min, &max) {
                debug!(files = files.len(), "time-bound read excluded every live table");
                return Ok(RawIter::new_excluded(iter));
            }
        }
        Ok(RawIter::new(iter))
    }

    /// Forces memtable contents to SSTs.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Syncs the WAL to disk.
    pub fn sync_wal(&self) -> Result<(), StorageError> {
        self.db.flush_wal(true)?;
        Ok(())
    }

    /// Ingests an externally built SST and records its time bounds.
    pub fn ingest_sst(
        &self,
        path: impl AsRef<Path>,
        bounds: TimeBounds,
        move_file: bool,
    ) -> Result<(), StorageError> {
        let mut opts = IngestExternalFileOptions::default();
        opts.set_move_files(move_file);
        // A forced global sequence number keeps outstanding snapshots
        // consistent, and a blocking flush resolves memtable overlap.
        opts.set_snapshot_consistency(true);
        opts.set_allow_global_seqno(true);
        opts.set_allow_blocking_flush(true);

        let before: HashSet<String> = self
            .db
            .live_files()?
            .into_iter()
            .map(|f| f.name)
            .collect();
        self.db
            .ingest_external_file_opts(&opts, vec![PathBuf::from(path.as_ref())])?;
        for file in self.db.live_files()? {
            if !before.contains(&file.name) {
                self.registry.record(file.name, bounds);
            }
        }
        Ok(())
    }

    /// Live-SST metadata, key ranges decoded.
    pub fn sstables(&self) -> Result<Vec<SstInfo>, StorageError> {
        let decode = |key: Option<Vec<u8>>| {
            key.and_then(|k| {
                super::key::decode_key(&k).map(|(user_key, ts)| (user_key.to_vec(), ts))
            })
        };
        Ok(self
            .db
            .live_files()?
            .into_iter()
            .map(|f| SstInfo {
                name: f.name,
                level: f.level,
                size: f.size,
                start_key: decode(f.start_key),
                end_key: decode(f.end_key),
            })
            .collect())
    }

    /// Recorded per-SST time bounds.
    pub fn sst_time_bounds(&self) -> Vec<(String, TimeBounds)> {
        self.registry.snapshot()
    }

    /// Operational statistics.
    pub fn stats(&self) -> Result<EngineStats, StorageError> {
        let prop = |name: &str| -> Result<u64, StorageError> {
            Ok(self.db.property_int_value(name)?.unwrap_or(0))
        };
        Ok(EngineStats {
            block_cache_hits: self.opts.get_ticker_count(Ticker::BlockCacheHit),
            block_cache_misses: self.opts.get_ticker_count(Ticker::BlockCacheMiss),
            block_cache_usage: self.cache.as_ref().map(|c| c.get_usage()).unwrap_or(0),
            block_cache_pinned_usage: self
                .cache
                .as_ref()
                .map(|c| c.get_pinned_usage())
                .unwrap_or(0),
            bloom_filter_prefix_checked: self
                .opts
                .get_ticker_count(Ticker::BloomFilterPrefixChecked),
            bloom_filter_prefix_useful: self.opts.get_ticker_count(Ticker::BloomFilterPrefixUseful),
            memtable_total_size: prop("rocksdb.cur-size-all-mem-tables")?,
            table_readers_mem_estimate: prop("rocksdb.estimate-table-readers-mem")?,
            pending_compaction_bytes_estimate: prop("rocksdb.estimate-pending-compaction-bytes")?,
        })
    }

    /// Compacts `[start, end)` down to the bottom-most level.
    ///
    /// Compacting a large span in one shot needs a span's worth of
    /// temporary disk. When the span already has bottom-level SSTs, they
    /// are walked in key order and compacted in ~128 MiB slices instead,
    /// each slice starting where the previous ended.
    pub fn compact_range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<(), StorageError> {
        let mut compact_opts = CompactOptions::default();
        // The bottom level must recompact to pick up filter/format changes
        // and reclaim space from deletions.
        compact_opts.set_bottommost_level_compaction(BottommostLevelCompaction::Force);

        let mut max_level = 0;
        let mut overlapping = Vec::new();
        for file in self.db.live_files()? {
            let outside = match (start, &file.end_key) {
                (Some(start), Some(largest)) => largest.as_slice() < start,
                _ => false,
            } || match (end, &file.start_key) {
                (Some(end), Some(smallest)) => smallest.as_slice() >= end,
                _ => false,
            };
            if outside {
                continue;
            }
            max_level = max_level.max(file.level);
            overlapping.push(file);
        }

        if max_level != NUM_LEVELS - 1 {
            // Nothing at the bottom level in this span; with dynamic level
            // sizing that means very little data. Compact wholesale.
            self.db.compact_range_opt(start, end, &compact_opts);
            return Ok(());
        }

        let mut ssts: Vec<_> = overlapping
            .into_iter()
            .filter(|f| f.level == max_level)
            .collect();
        ssts.sort_by(|a, b| a.start_key.cmp(&b.start_key));

        let mut last: Option<Vec<u8>> = None;
        let mut size: u64 = 0;
        for sst in &ssts {
            size += sst.size as u64;
            if size < COMPACTION_TARGET_SIZE {
                continue;
            }
            let Some(cur) = sst.end_key.clone() else {
                continue;
            };
            debug!(bytes = size, "compacting bottom-most slice");
            self.db
                .compact_range_opt(last.as_deref(), Some(&cur), &compact_opts);
            last = Some(cur);
            size = 0;
        }
        if size > 0 {
            self.db
                .compact_range_opt(last.as_deref(), None::<&[u8]>, &compact_opts);
        }
        Ok(())
    }
}

/// A point-in-time view of an engine. Iterators opened against it observe
/// no writes made after its creation.
pub struct EngineSnapshot<'e> {
    engine: &'e Engine,
    snap: SnapshotWithThreadMode<'e, Db>,
}

impl<'e> EngineSnapshot<'e> {
    pub fn get(&self, key: &[u8], ts: Timestamp) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.snap.get(encode_key(key, ts))?)
    }

    pub fn new_iter(&self, opts: IterOpts) -> Result<RawIter<'_>, StorageError> {
        let iter = self.snap.raw_iterator_opt(opts.read_options());
        if let Some((min, max)) = opts.time_bounds {
            let min = encode_timestamp_full(min);
            let max = encode_timestamp_full(max);
            let files: Vec<String> = self
                .engine
                .db
                .live_files()?
                .into_iter()
                .map(|f| f.name)
                .collect();
            if !files.is_empty() && self.engine.registry.all_excluded(&files, &min, &max) {
                return Ok(RawIter::new_excluded(iter));
            }
        }
        Ok(RawIter::new(iter))
    }
}

/// Dynamic dispatch over the engine, a snapshot, or a batch. Operations a
/// variant cannot honor report `Unsupported`: snapshots refuse writes,
/// write-only batches refuse reads, and only batches commit.
pub enum Handle<'a, 'e> {
    Db(&'a Engine),
    Snapshot(&'a EngineSnapshot<'e>),
    Batch(&'a mut Batch<'e>),
    WriteOnlyBatch(&'a mut WriteOnlyBatch<'e>),
}

impl Handle<'_, '_> {
    pub fn put(&mut self, key: &[u8], ts: Timestamp, value: &[u8]) -> Result<(), StorageError> {
        match self {
            Handle::Db(engine) => engine.put(key, ts, value),
            Handle::Snapshot(_) => Err(StorageError::Unsupported("put on a snapshot")),
            Handle::Batch(batch) => {
                batch.put(key, ts, value);
                Ok(())
            }
            Handle::WriteOnlyBatch(batch) => {
                batch.put(key, ts, value);
                Ok(())
            }
        }
    }

    pub fn merge(&mut self, key: &[u8], ts: Timestamp, value: &[u8]) -> Result<(), StorageError> {
        match self {
            Handle::Db(engine) => engine.merge(key, ts, value),
            Handle::Snapshot(_) => Err(StorageError::Unsupported("merge on a snapshot")),
            Handle::Batch(batch) => {
                batch.merge(key, ts, value);
                Ok(())
            }
            Handle::WriteOnlyBatch(batch) => {
                batch.merge(key, ts, value);
                Ok(())
            }
        }
    }

    pub fn delete(&mut self, key: &[u8], ts: Timestamp) -> Result<(), StorageError> {
        match self {
            Handle::Db(engine) => engine.delete(key, ts),
            Handle::Snapshot(_) => Err(StorageError::Unsupported("delete on a snapshot")),
            Handle::Batch(batch) => {
                batch.delete(key, ts);
                Ok(())
            }
            Handle::WriteOnlyBatch(batch) => {
                batch.delete(key, ts);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &[u8], ts: Timestamp) -> Result<Option<Vec<u8>>, StorageError> {
        match self {
            Handle::Db(engine) => engine.get(key, ts),
            Handle::Snapshot(snapshot) => snapshot.get(key, ts),
            Handle::Batch(batch) => batch.get(key, ts),
            Handle::WriteOnlyBatch(_) => {
                Err(StorageError::Unsupported("get on a write-only batch"))
            }
        }
    }

    pub fn commit(&mut self, sync: bool) -> Result<(), StorageError> {
        match self {
            Handle::Db(_) => Err(StorageError::Unsupported("commit on the engine")),
            Handle::Snapshot(_) => Err(StorageError::Unsupported("commit on a snapshot")),
            Handle::Batch(batch) => batch.commit(sync),
            Handle::WriteOnlyBatch(batch) => batch.commit(sync),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::value::{
        decode_time_series, encode_time_series_value, Metadata, TimeSeriesData, TimeSeriesSample,
    };
    use tempfile::TempDir;

    fn create_test_engine() -> (Engine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        (engine, dir)
    }

    fn ts(wall: i64) -> Timestamp {
        Timestamp::new(wall, 0)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (engine, _dir) = create_test_engine();
        engine.put(b"k", ts(10), b"v").unwrap();
        assert_eq!(engine.get(b"k", ts(10)).unwrap(), Some(b"v".to_vec()));
        // Different timestamp, different row.
        assert_eq!(engine.get(b"k", ts(11)).unwrap(), None);
        assert_eq!(engine.get(b"missing", ts(10)).unwrap(), None);
    }

    #[test]
    fn test_delete() {
        let (engine, _dir) = create_test_engine();
        engine.put(b"k", ts(10), b"v").unwrap();
        engine.delete(b"k", ts(10)).unwrap();
        assert_eq!(engine.get(b"k", ts(10)).unwrap(), None);
    }

    #[test]
    fn test_versions_order_newest_first() {
        let (engine, _dir) = create_test_engine();
        engine.put(b"k", ts(10), b"old").unwrap();
        engine.put(b"k", ts(20), b"new").unwrap();
        engine.put(b"k", Timestamp::ZERO, b"meta").unwrap();

        let mut iter = engine.new_iter(IterOpts::default()).unwrap();
        iter.seek(&encode_key(b"k", Timestamp::ZERO));

        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(iter.value().unwrap().to_vec());
            iter.next();
        }
        assert_eq!(seen, vec![b"meta".to_vec(), b"new".to_vec(), b"old".to_vec()]);
    }

    #[test]
    fn test_engine_merge_applies_on_read() {
        let (engine, _dir) = create_test_engine();
        let operand = |offset: i32, sum: f64| {
            Metadata::from_raw_bytes(
                encode_time_series_value(&TimeSeriesData {
                    start_timestamp_nanos: 1_000,
                    sample_duration_nanos: 10,
                    samples: vec![TimeSeriesSample::new(offset, sum)],
                })
                .unwrap(),
            )
            .encode()
            .unwrap()
        };

        engine.merge(b"series", Timestamp::ZERO, &operand(2, 2.0)).unwrap();
        engine.merge(b"series", Timestamp::ZERO, &operand(1, 1.0)).unwrap();

        let merged = engine.get(b"series", Timestamp::ZERO).unwrap().unwrap();
        let meta = Metadata::decode(&merged).unwrap();
        let data = decode_time_series(meta.raw_bytes.as_ref().unwrap()).unwrap();
        let offsets: Vec<i32> = data.samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![1, 2]);
    }

    #[test]
    fn test_batch_commit_visibility() {
        let (engine, _dir) = create_test_engine();

        let mut batch = engine.new_batch();
        batch.put(b"k", ts(10), b"v");
        // Not visible until commit.
        assert_eq!(engine.get(b"k", ts(10)).unwrap(), None);
        batch.commit(false).unwrap();
        assert_eq!(engine.get(b"k", ts(10)).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_batch_repr_roundtrip() {
        let (engine, _dir) = create_test_engine();

        let mut batch = engine.new_batch();
        batch.put(b"a", ts(10), b"1");
        batch.delete(b"b", ts(10));
        let repr = batch.repr().unwrap();

        // Apply the representation wholesale.
        engine.put(b"b", ts(10), b"doomed").unwrap();
        engine.apply_batch_repr(&repr, false).unwrap();
        assert_eq!(engine.get(b"a", ts(10)).unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"b", ts(10)).unwrap(), None);

        // And replay it into another batch.
        let mut replayed = engine.new_batch();
        replayed.apply_repr(&repr).unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[test]
    fn test_write_only_batch_commit() {
        let (engine, _dir) = create_test_engine();
        let mut batch = engine.new_write_only_batch();
        batch.put(b"k", ts(10), b"v");
        batch.commit(false).unwrap();
        assert_eq!(engine.get(b"k", ts(10)).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_snapshot_pins_view() {
        let (engine, _dir) = create_test_engine();
        engine.put(b"k", ts(10), b"v1").unwrap();

        let snapshot = engine.snapshot();
        engine.put(b"k", ts(20), b"v2").unwrap();

        assert_eq!(snapshot.get(b"k", ts(10)).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(snapshot.get(b"k", ts(20)).unwrap(), None);
        assert_eq!(engine.get(b"k", ts(20)).unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_handle_unsupported_matrix() {
        let (engine, _dir) = create_test_engine();
        engine.put(b"k", ts(10), b"v").unwrap();

        let snapshot = engine.snapshot();
        let mut handle = Handle::Snapshot(&snapshot);
        assert!(matches!(
            handle.put(b"k", ts(20), b"v"),
            Err(StorageError::Unsupported(_))
        ));
        assert!(matches!(
            handle.commit(false),
            Err(StorageError::Unsupported(_))
        ));
        assert_eq!(handle.get(b"k", ts(10)).unwrap(), Some(b"v".to_vec()));

        let mut handle = Handle::Db(&engine);
        assert!(matches!(
            handle.commit(false),
            Err(StorageError::Unsupported(_))
        ));
        handle.put(b"k2", ts(10), b"v2").unwrap();

        let mut wob = engine.new_write_only_batch();
        let mut handle = Handle::WriteOnlyBatch(&mut wob);
        handle.put(b"k3", ts(10), b"v3").unwrap();
        assert!(matches!(
            handle.get(b"k3", ts(10)),
            Err(StorageError::Unsupported(_))
        ));
        handle.commit(false).unwrap();
        assert_eq!(engine.get(b"k3", ts(10)).unwrap(), Some(b"v3".to_vec()));

        let mut batch = engine.new_batch();
        let mut handle = Handle::Batch(&mut batch);
        handle.put(b"k4", ts(10), b"v4").unwrap();
        assert_eq!(handle.get(b"k4", ts(10)).unwrap(), Some(b"v4".to_vec()));
        handle.commit(false).unwrap();
        assert_eq!(engine.get(b"k4", ts(10)).unwrap(), Some(b"v4".to_vec()));
    }

    #[test]
    fn test_delete_iter_range() {
        let (engine, _dir) = create_test_engine();
        for key in [b"a", b"b", b"c", b"d"] {
            engine.put(key, ts(10), b"v").unwrap();
        }

        let mut iter = engine.new_iter(IterOpts::default()).unwrap();
        engine.delete_iter_range(&mut iter, b"b", b"d").unwrap();
        drop(iter);

        assert_eq!(engine.get(b"a", ts(10)).unwrap(), Some(b"v".to_vec()));
        assert_eq!(engine.get(b"b", ts(10)).unwrap(), None);
        assert_eq!(engine.get(b"c", ts(10)).unwrap(), None);
        assert_eq!(engine.get(b"d", ts(10)).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_delete_range_tombstone() {
        let (engine, _dir) = create_test_engine();
        engine.put(b"b", ts(10), b"v").unwrap();
        engine.put(b"c", ts(10), b"v").unwrap();
        engine.delete_range(b"a", b"c", ts(10)).unwrap();
        assert_eq!(engine.get(b"b", ts(10)).unwrap(), None);
        assert_eq!(engine.get(b"c", ts(10)).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_shared_cache_reservation() {
        let cache = Arc::new(EngineCache::new(256 << 20));
        let dir1 = TempDir::new().unwrap();
        let dir2 = TempDir::new().unwrap();

        let config = |cache: &Arc<EngineCache>| EngineConfig {
            cache: Some(Arc::clone(cache)),
            ..EngineConfig::default()
        };
        let engine1 = Engine::open(dir1.path(), config(&cache)).unwrap();
        let engine2 = Engine::open(dir2.path(), config(&cache)).unwrap();

        // Two reservations deducted from the shared capacity.
        assert_eq!(
            cache.state.lock().capacity,
            (256 << 20) - 2 * WRITE_BUFFER_SIZE
        );

        engine1.put(b"k", ts(10), b"v").unwrap();
        engine2.put(b"k", ts(10), b"v").unwrap();
    }

    #[test]
    fn test_compact_range_smoke() {
        let (engine, _dir) = create_test_engine();
        for i in 0..100u32 {
            engine
                .put(format!("key{i:04}").as_bytes(), ts(10), &[0u8; 512])
                .unwrap();
        }
        engine.flush().unwrap();
        engine.compact_range(None, None).unwrap();
        engine
            .compact_range(Some(b"key0010".as_slice()), Some(b"key0050".as_slice()))
            .unwrap();
        assert_eq!(
            engine.get(b"key0020", ts(10)).unwrap(),
            Some(vec![0u8; 512])
        );
    }

    #[test]
    fn test_sstables_report_decoded_bounds() {
        let (engine, _dir) = create_test_engine();
        engine.put(b"a", ts(10), b"v").unwrap();
        engine.put(b"z", ts(20), b"v").unwrap();
        engine.flush().unwrap();

        let tables = engine.sstables().unwrap();
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(
            table.start_key.as_ref().map(|(k, t)| (k.clone(), *t)),
            Some((b"a".to_vec(), ts(10)))
        );
        assert_eq!(
            table.end_key.as_ref().map(|(k, t)| (k.clone(), *t)),
            Some((b"z".to_vec(), ts(20)))
        );
        assert!(table.size > 0);
    }

    #[test]
    fn test_prefix_bloom_rejects_missing_key() {
        let (engine, _dir) = create_test_engine();
        for i in 0..1000u32 {
            engine
                .put(format!("key{i:04}").as_bytes(), ts(10), b"v")
                .unwrap();
        }
        engine.flush().unwrap();

        // A key inside the SST's range but with a prefix no key has: the
        // seek must be answered by the prefix bloom filter.
        let mut iter = engine
            .new_iter(IterOpts {
                prefix: true,
                ..IterOpts::default()
            })
            .unwrap();
        iter.seek(&encode_key(b"key0500x", Timestamp::ZERO));
        let _ = iter.valid();
        drop(iter);

        let stats = engine.stats().unwrap();
        assert!(stats.bloom_filter_prefix_checked >= 1);
        assert!(stats.bloom_filter_prefix_useful >= 1);
    }
}
