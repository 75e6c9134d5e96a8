// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! SST construction for ingestion and backup.
//!
//! [`SstWriter`] builds an SST file under the MVCC comparator, collecting
//! per-file timestamp bounds as keys are added. The finished bytes can be
//! shipped elsewhere, and the file itself can be handed to
//! [`Engine::ingest_sst`](super::engine::Engine::ingest_sst) together with
//! its bounds.

use std::path::PathBuf;

use rocksdb::{BlockBasedOptions, Options, SstFileWriter};

use crate::time::Timestamp;

use super::error::StorageError;
use super::key::{encode_key, mvcc_compare, COMPARATOR_NAME};
use super::props::{TimeBoundCollector, TimeBounds};

/// Options for building standalone SSTs: the MVCC comparator plus large
/// blocks, since these files are written once and mostly read
/// sequentially.
pub fn sst_writer_options() -> Options {
    let mut table = BlockBasedOptions::default();
    table.set_block_size(64 * 1024);
    table.set_format_version(2);

    let mut opts = Options::default();
    opts.set_comparator(COMPARATOR_NAME, Box::new(|a, b| mvcc_compare(a, b)));
    opts.set_block_based_table_factory(&table);
    opts
}

/// Writes an SST file one key at a time. Keys must be added in MVCC key
/// order.
pub struct SstWriter<'a> {
    rep: SstFileWriter<'a>,
    path: PathBuf,
    collector: TimeBoundCollector,
    count: u64,
}

impl<'a> SstWriter<'a> {
    /// Creates the SST file at `path`. `opts` should come from
    /// [`sst_writer_options`] and must outlive the writer.
    pub fn open(opts: &'a Options, path: impl Into<PathBuf>) -> Result<SstWriter<'a>, StorageError> {
        let path = path.into();
        let mut rep = SstFileWriter::create(opts);
        rep.open(&path)?;
        Ok(SstWriter {
            rep,
            path,
            collector: TimeBoundCollector::new(),
            count: 0,
        })
    }

    /// Appends one key/value pair.
    pub fn put(&mut self, key: &[u8], ts: Timestamp, value: &[u8]) -> Result<(), StorageError> {
        let encoded = encode_key(key, ts);
        self.collector.add(&encoded);
        self.rep.put(&encoded, value)?;
        self.count += 1;
        Ok(())
    }

    /// Number of keys written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Finalizes the file and returns its complete contents along with the
    /// collected timestamp bounds.
    pub fn finish(mut self) -> Result<(Vec<u8>, TimeBounds), StorageError> {
        self.rep.finish()?;
        let data = std::fs::read(&self.path)?;
        Ok((data, self.collector.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::{Engine, EngineConfig};
    use crate::storage::iter::{EngineIter, IterOpts};
    use crate::storage::props::encode_timestamp_full;
    use crate::storage::scanner::mvcc_scan;
    use tempfile::TempDir;

    fn ts(wall: i64) -> Timestamp {
        Timestamp::new(wall, 0)
    }

    fn build_sst(dir: &TempDir) -> (PathBuf, TimeBounds) {
        let path = dir.path().join("external.sst");
        let opts = sst_writer_options();
        let mut writer = SstWriter::open(&opts, &path).unwrap();
        writer.put(b"a", ts(10), b"va").unwrap();
        writer.put(b"b", ts(20), b"vb").unwrap();
        writer.put(b"c", ts(15), b"vc").unwrap();
        assert_eq!(writer.count(), 3);
        let (data, bounds) = writer.finish().unwrap();
        assert!(!data.is_empty());
        (path, bounds)
    }

    #[test]
    fn test_writer_collects_bounds() {
        let dir = TempDir::new().unwrap();
        let (_path, bounds) = build_sst(&dir);
        assert_eq!(bounds.ts_min, Some(encode_timestamp_full(ts(10))));
        assert_eq!(bounds.ts_max, Some(encode_timestamp_full(ts(20))));
    }

    #[test]
    fn test_ingest_and_read_back() {
        let sst_dir = TempDir::new().unwrap();
        let (path, bounds) = build_sst(&sst_dir);

        let db_dir = TempDir::new().unwrap();
        let engine = Engine::open(db_dir.path(), EngineConfig::default()).unwrap();
        engine.ingest_sst(&path, bounds, false).unwrap();

        assert_eq!(engine.get(b"a", ts(10)).unwrap(), Some(b"va".to_vec()));
        assert_eq!(engine.get(b"b", ts(20)).unwrap(), Some(b"vb".to_vec()));

        let recorded = engine.sst_time_bounds();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, bounds);
    }

    #[test]
    fn test_time_bound_iterator_filters_tables() {
        let sst_dir = TempDir::new().unwrap();
        let (path, bounds) = build_sst(&sst_dir);

        let db_dir = TempDir::new().unwrap();
        let engine = Engine::open(db_dir.path(), EngineConfig::default()).unwrap();
        engine.ingest_sst(&path, bounds, false).unwrap();

        // Requested range above every version: the only live SST is
        // excluded and the scan sees nothing.
        let mut iter = engine
            .new_iter(IterOpts {
                time_bounds: Some((ts(100), ts(200))),
                ..IterOpts::default()
            })
            .unwrap();
        let results = mvcc_scan(&mut iter, b"a", b"z", ts(300), 1000, None, true, false).unwrap();
        assert!(results.kvs.is_empty());

        // Overlapping range: everything is visible.
        let mut iter = engine
            .new_iter(IterOpts {
                time_bounds: Some((ts(15), ts(25))),
                ..IterOpts::default()
            })
            .unwrap();
        let results = mvcc_scan(&mut iter, b"a", b"z", ts(300), 1000, None, true, false).unwrap();
        assert_eq!(results.kvs.len(), 3);
    }

    #[test]
    fn test_unregistered_tables_always_included() {
        let db_dir = TempDir::new().unwrap();
        let engine = Engine::open(db_dir.path(), EngineConfig::default()).unwrap();
        engine.put(b"k", ts(10), b"v").unwrap();
        engine.flush().unwrap();

        // The flushed SST has no recorded bounds, so a disjoint time-bound
        // request must still read it.
        let mut iter = engine
            .new_iter(IterOpts {
                time_bounds: Some((ts(100), ts(200))),
                ..IterOpts::default()
            })
            .unwrap();
        iter.seek_to_first();
        assert!(iter.valid());
    }
}
