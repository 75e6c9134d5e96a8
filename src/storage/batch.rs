// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Write batches.
//!
//! A [`Batch`] is an atomic group of writes with an in-memory index that
//! supports read-your-writes: `get` and `new_iter` observe the batch's
//! contents overlaid on the engine. A [`WriteOnlyBatch`] skips the index and
//! supports only writes and commit.
//!
//! Ops are appended in sequence order. [`BatchIter`] exposes them sorted by
//! encoded key under the MVCC ordering; all entries for a key appear
//! consecutively, earlier operations first. Mutating a batch invalidates its
//! iterators, which the borrow checker enforces.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

use super::engine::Engine;
use super::error::StorageError;
use super::iter::IterOpts;
use super::key::{encode_key, mvcc_compare};
use super::overlay::{process_delta_key, EngineGetter, OverlayIter};

/// One batch operation over encoded MVCC keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Merge { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    DeleteRange { start: Vec<u8>, end: Vec<u8> },
}

impl BatchOp {
    fn is_point(&self) -> bool {
        !matches!(self, BatchOp::DeleteRange { .. })
    }
}

// The key a point op indexes under; DeleteRange ops are not indexed and
// return their start key only so this stays total.
fn op_key(op: &BatchOp) -> &[u8] {
    match op {
        BatchOp::Put { key, .. } | BatchOp::Merge { key, .. } | BatchOp::Delete { key } => key,
        BatchOp::DeleteRange { start, .. } => start,
    }
}

/// An indexed write batch over an engine.
pub struct Batch<'e> {
    engine: &'e Engine,
    ops: Vec<BatchOp>,
    has_delete_range: bool,
}

impl<'e> Batch<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            ops: Vec::new(),
            has_delete_range: false,
        }
    }

    /// Number of buffered operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn put(&mut self, key: &[u8], ts: Timestamp, value: &[u8]) {
        self.ops.push(BatchOp::Put {
            key: encode_key(key, ts),
            value: value.to_vec(),
        });
    }

    pub fn merge(&mut self, key: &[u8], ts: Timestamp, value: &[u8]) {
        self.ops.push(BatchOp::Merge {
            key: encode_key(key, ts),
            value: value.to_vec(),
        });
    }

    pub fn delete(&mut self, key: &[u8], ts: Timestamp) {
        self.ops.push(BatchOp::Delete {
            key: encode_key(key, ts),
        });
    }

    pub fn delete_range(&mut self, start: &[u8], end: &[u8], ts: Timestamp) {
        self.has_delete_range = true;
        self.ops.push(BatchOp::DeleteRange {
            start: encode_key(start, ts),
            end: encode_key(end, ts),
        });
    }

    /// The batch's wire representation.
    pub fn repr(&self) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(&self.ops)?)
    }

    /// Replays a wire representation into this batch.
    pub fn apply_repr(&mut self, repr: &[u8]) -> Result<(), StorageError> {
        let ops: Vec<BatchOp> = bincode::deserialize(repr)
            .map_err(|e| StorageError::Corruption(format!("unable to decode batch repr: {e}")))?;
        for op in ops {
            if !op.is_point() {
                self.has_delete_range = true;
            }
            self.ops.push(op);
        }
        Ok(())
    }

    /// Writes the batch to the engine atomically. The batch keeps its
    /// contents; committing twice rewrites the same updates.
    pub fn commit(&self, sync: bool) -> Result<(), StorageError> {
        if self.ops.is_empty() {
            return Ok(());
        }
        self.engine.apply_ops(&self.ops, sync)
    }

    /// Reads `key` as of the batch: engine state with this batch's updates
    /// applied on top.
    pub fn get(&self, key: &[u8], ts: Timestamp) -> Result<Option<Vec<u8>>, StorageError> {
        let encoded = encode_key(key, ts);
        if self.ops.is_empty() {
            return self.engine.get_raw(&encoded);
        }
        if self.has_delete_range {
            return Err(StorageError::Unsupported(
                "cannot read from a batch containing delete range entries",
            ));
        }
        let mut delta = BatchIter::new(&self.ops);
        delta.seek(&encoded);
        let mut base = EngineGetter::new(self.engine, encoded.clone());
        let mut value = None;
        process_delta_key(&mut base, &mut delta, &encoded, &mut value)?;
        Ok(value)
    }

    /// Opens a merged iterator over the engine and this batch.
    pub fn new_iter(&self, opts: IterOpts) -> Result<OverlayIter<'_>, StorageError> {
        if self.has_delete_range {
            return Err(StorageError::Unsupported(
                "cannot iterate a batch containing delete range entries",
            ));
        }
        let base = self.engine.new_iter(opts)?;
        Ok(OverlayIter::new(
            base,
            BatchIter::new(&self.ops),
            opts.prefix,
        ))
    }
}

/// An unindexed batch: writes, repr and commit only.
pub struct WriteOnlyBatch<'e>(Batch<'e>);

impl<'e> WriteOnlyBatch<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self(Batch::new(engine))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn put(&mut self, key: &[u8], ts: Timestamp, value: &[u8]) {
        self.0.put(key, ts, value)
    }

    pub fn merge(&mut self, key: &[u8], ts: Timestamp, value: &[u8]) {
        self.0.merge(key, ts, value)
    }

    pub fn delete(&mut self, key: &[u8], ts: Timestamp) {
        self.0.delete(key, ts)
    }

    pub fn delete_range(&mut self, start: &[u8], end: &[u8], ts: Timestamp) {
        self.0.delete_range(start, end, ts)
    }

    pub fn repr(&self) -> Result<Vec<u8>, StorageError> {
        self.0.repr()
    }

    pub fn apply_repr(&mut self, repr: &[u8]) -> Result<(), StorageError> {
        self.0.apply_repr(repr)
    }

    pub fn commit(&self, sync: bool) -> Result<(), StorageError> {
        self.0.commit(sync)
    }
}

/// Iterator over a batch's point operations in `(key, seqno)` order.
pub struct BatchIter<'b> {
    ops: &'b [BatchOp],
    order: Vec<usize>,
    pos: isize,
}

impl<'b> BatchIter<'b> {
    pub(crate) fn new(ops: &'b [BatchOp]) -> Self {
        let mut order: Vec<usize> = (0..ops.len()).filter(|&i| ops[i].is_point()).collect();
        // Stable sort: ops at the same key keep insertion (sequence) order.
        order.sort_by(|&a, &b| mvcc_compare(op_key(&ops[a]), op_key(&ops[b])));
        Self {
            ops,
            order,
            pos: 0,
        }
    }

    /// Positions at the first entry with key >= `key` under the MVCC
    /// ordering.
    pub fn seek(&mut self, key: &[u8]) {
        self.pos = self
            .order
            .partition_point(|&i| mvcc_compare(op_key(&self.ops[i]), key) == Ordering::Less)
            as isize;
    }

    pub fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    pub fn seek_to_last(&mut self) {
        self.pos = self.order.len() as isize - 1;
    }

    pub fn next(&mut self) {
        if self.valid() {
            self.pos += 1;
        }
    }

    pub fn prev(&mut self) {
        if self.valid() {
            self.pos -= 1;
        }
    }

    pub fn valid(&self) -> bool {
        self.pos >= 0 && (self.pos as usize) < self.order.len()
    }

    /// The current operation. The returned reference outlives iterator
    /// movement.
    pub fn entry(&self) -> Option<&'b BatchOp> {
        if self.valid() {
            Some(&self.ops[self.order[self.pos as usize]])
        } else {
            None
        }
    }

    /// The current operation's encoded key.
    pub fn key(&self) -> Option<&'b [u8]> {
        self.entry().map(op_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &[u8], ts: i64, value: &[u8]) -> BatchOp {
        BatchOp::Put {
            key: encode_key(key, Timestamp::new(ts, 0)),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_iter_orders_by_key_then_seqno() {
        let ops = vec![
            put(b"b", 10, b"1"),
            put(b"a", 10, b"2"),
            put(b"b", 10, b"3"),
        ];
        let mut iter = BatchIter::new(&ops);
        iter.seek_to_first();

        let mut seen = Vec::new();
        while let Some(op) = iter.entry() {
            seen.push(op.clone());
            iter.next();
        }
        // "a" first, then both "b" entries in insertion order.
        assert_eq!(seen, vec![ops[1].clone(), ops[0].clone(), ops[2].clone()]);
    }

    #[test]
    fn test_iter_newest_version_first_within_key() {
        let ops = vec![put(b"a", 10, b"old"), put(b"a", 20, b"new")];
        let mut iter = BatchIter::new(&ops);
        iter.seek_to_first();
        assert_eq!(iter.entry(), Some(&ops[1]));
        iter.next();
        assert_eq!(iter.entry(), Some(&ops[0]));
    }

    #[test]
    fn test_iter_seek() {
        let ops = vec![put(b"a", 10, b"1"), put(b"c", 10, b"2")];
        let mut iter = BatchIter::new(&ops);

        iter.seek(&encode_key(b"b", Timestamp::new(10, 0)));
        assert_eq!(iter.entry(), Some(&ops[1]));

        iter.seek(&encode_key(b"d", Timestamp::new(10, 0)));
        assert!(!iter.valid());
        assert_eq!(iter.entry(), None);
    }

    #[test]
    fn test_iter_skips_delete_range() {
        let ops = vec![
            put(b"a", 10, b"1"),
            BatchOp::DeleteRange {
                start: encode_key(b"a", Timestamp::ZERO),
                end: encode_key(b"z", Timestamp::ZERO),
            },
        ];
        let mut iter = BatchIter::new(&ops);
        iter.seek_to_first();
        assert_eq!(iter.entry(), Some(&ops[0]));
        iter.next();
        assert!(!iter.valid());
    }

    #[test]
    fn test_iter_prev_past_front_invalidates() {
        let ops = vec![put(b"a", 10, b"1")];
        let mut iter = BatchIter::new(&ops);
        iter.seek_to_first();
        assert!(iter.valid());
        iter.prev();
        assert!(!iter.valid());
    }
}
