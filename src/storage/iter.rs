// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The iterator seam between the engine and the MVCC read path.
//!
//! [`EngineIter`] abstracts over a raw engine iterator and the indexed-batch
//! overlay so the scanner and the auxiliary passes can run against either.
//! Entry views returned by `key()`/`value()` are valid only until the next
//! movement of the iterator.

use rocksdb::{DBRawIteratorWithThreadMode, ReadOptions};

use crate::time::Timestamp;

use super::engine::Db;
use super::error::StorageError;

/// Options for engine iterators.
///
/// A prefix iterator restricts iteration to keys sharing the seek key's
/// extracted prefix and may consult bloom filters; otherwise seeks are
/// total-order. Time bounds request SST-level filtering by version
/// timestamp and force total-order seeks.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterOpts {
    pub prefix: bool,
    pub time_bounds: Option<(Timestamp, Timestamp)>,
}

impl IterOpts {
    pub(crate) fn read_options(&self) -> ReadOptions {
        let mut opts = ReadOptions::default();
        if self.time_bounds.is_some() {
            opts.set_total_order_seek(true);
        } else {
            opts.set_prefix_same_as_start(self.prefix);
            opts.set_total_order_seek(!self.prefix);
        }
        opts
    }
}

/// Ordered iterator surface consumed by the scanner and auxiliary passes.
pub trait EngineIter {
    fn seek(&mut self, key: &[u8]);
    fn seek_for_prev(&mut self, key: &[u8]);
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    fn next(&mut self);
    fn prev(&mut self);
    fn valid(&self) -> bool;
    fn key(&self) -> Option<&[u8]>;
    fn value(&self) -> Option<&[u8]>;
    fn status(&self) -> Result<(), StorageError>;
}

/// An iterator over the engine (or a snapshot of it).
pub struct RawIter<'a> {
    inner: DBRawIteratorWithThreadMode<'a, Db>,
    // Set when a time-bound read determined that no live SST can contain a
    // relevant version; the iterator then reports no entries.
    excluded: bool,
}

impl<'a> RawIter<'a> {
    pub(crate) fn new(inner: DBRawIteratorWithThreadMode<'a, Db>) -> Self {
        Self {
            inner,
            excluded: false,
        }
    }

    pub(crate) fn new_excluded(inner: DBRawIteratorWithThreadMode<'a, Db>) -> Self {
        Self {
            inner,
            excluded: true,
        }
    }
}

impl EngineIter for RawIter<'_> {
    fn seek(&mut self, key: &[u8]) {
        if !self.excluded {
            self.inner.seek(key);
        }
    }

    fn seek_for_prev(&mut self, key: &[u8]) {
        if !self.excluded {
            self.inner.seek_for_prev(key);
        }
    }

    fn seek_to_first(&mut self) {
        if !self.excluded {
            self.inner.seek_to_first();
        }
    }

    fn seek_to_last(&mut self) {
        if !self.excluded {
            self.inner.seek_to_last();
        }
    }

    fn next(&mut self) {
        if self.inner.valid() {
            self.inner.next();
        }
    }

    fn prev(&mut self) {
        if self.inner.valid() {
            self.inner.prev();
        }
    }

    fn valid(&self) -> bool {
        !self.excluded && self.inner.valid()
    }

    fn key(&self) -> Option<&[u8]> {
        if self.excluded {
            None
        } else {
            self.inner.key()
        }
    }

    fn value(&self) -> Option<&[u8]> {
        if self.excluded {
            None
        } else {
            self.inner.value()
        }
    }

    fn status(&self) -> Result<(), StorageError> {
        self.inner.status().map_err(StorageError::from)
    }
}
