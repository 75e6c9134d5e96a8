// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Merged view of an engine iterator and an indexed batch.
//!
//! [`OverlayIter`] walks a base iterator and a batch iterator in lockstep,
//! resolving puts, deletes and merges from the batch against the base. All
//! of a key's batch entries are folded into a single value before the key is
//! surfaced; deletion tombstones suppress the key entirely.
//!
//! Reverse iteration is not supported: `prev`/`seek_for_prev` report an
//! error.

use tracing::warn;

use super::batch::{BatchIter, BatchOp};
use super::engine::Engine;
use super::error::StorageError;
use super::iter::{EngineIter, RawIter};
use super::key::{key_prefix, mvcc_compare};
use super::merge::merge_one_value;

/// Source of the pre-batch ("base") value for a key, used when the first
/// batch entry for the key is a merge.
pub trait Getter {
    fn get(&mut self) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Fetches the base value from an engine lookup of a fixed key.
pub(crate) struct EngineGetter<'e> {
    engine: &'e Engine,
    key: Vec<u8>,
}

impl<'e> EngineGetter<'e> {
    pub(crate) fn new(engine: &'e Engine, key: Vec<u8>) -> Self {
        Self { engine, key }
    }
}

impl Getter for EngineGetter<'_> {
    fn get(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        self.engine.get_raw(&self.key)
    }
}

// Fetches the base value from the entry an iterator is positioned at, if
// any.
struct IterGetter<'i, 'a> {
    iter: Option<&'i RawIter<'a>>,
}

impl Getter for IterGetter<'_, '_> {
    fn get(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.iter.and_then(|it| it.value().map(<[u8]>::to_vec)))
    }
}

/// Folds all batch entries for `key` into `value`, consulting `base` for
/// the pre-batch value when the first entry is a merge. `delta` must have
/// been positioned at `key`'s first entry (or wherever a seek for `key`
/// landed). On return the delta iterator points past the key's entries and
/// `value` holds the folded result, `None` meaning deleted.
///
/// If no entries existed for `key`, the base value is returned unchanged.
pub(crate) fn process_delta_key(
    base: &mut dyn Getter,
    delta: &mut BatchIter<'_>,
    key: &[u8],
    value: &mut Option<Vec<u8>>,
) -> Result<(), StorageError> {
    *value = None;

    let mut count = 0;
    while let Some(op) = delta.entry() {
        match op {
            BatchOp::Put { key: k, value: v } => {
                if k.as_slice() != key {
                    break;
                }
                *value = Some(v.clone());
            }
            BatchOp::Delete { key: k } => {
                if k.as_slice() != key {
                    break;
                }
                *value = None;
            }
            BatchOp::Merge { key: k, value: operand } => {
                if k.as_slice() != key {
                    break;
                }
                let existing = if count == 0 { base.get()? } else { value.take() };
                *value = Some(match existing {
                    Some(existing) => merge_one_value(&existing, operand)?,
                    None => operand.clone(),
                });
            }
            // Not indexed; cannot appear under a point iterator.
            BatchOp::DeleteRange { .. } => break,
        }
        count += 1;
        delta.next();
    }

    if count == 0 {
        *value = base.get()?;
    }
    Ok(())
}

/// An iterator providing a merged view of a base iterator and an indexed
/// batch.
pub struct OverlayIter<'a> {
    base: RawIter<'a>,
    delta: BatchIter<'a>,
    // Whether the current entry comes from the base iterator. equal_keys
    // marks both sides positioned at the same key, requiring both to
    // advance together.
    current_at_base: bool,
    equal_keys: bool,
    status: Option<StorageError>,
    // The folded value for the current delta key; None is a tombstone.
    merged: Option<Vec<u8>>,
    // Owned copy of the current delta key, kept stable across batch-entry
    // traversal.
    delta_key: Vec<u8>,
    prefix_same_as_start: bool,
    prefix_start: Option<Vec<u8>>,
}

impl<'a> OverlayIter<'a> {
    pub(crate) fn new(base: RawIter<'a>, delta: BatchIter<'a>, prefix_same_as_start: bool) -> Self {
        Self {
            base,
            delta,
            current_at_base: true,
            equal_keys: false,
            status: None,
            merged: None,
            delta_key: Vec::new(),
            prefix_same_as_start,
            prefix_start: None,
        }
    }

    fn advance(&mut self) {
        if self.equal_keys {
            self.base.next();
            self.advance_delta();
        } else if self.current_at_base {
            self.base.next();
        } else {
            self.advance_delta();
        }
        self.update_current(self.prefix_same_as_start);
    }

    fn advance_delta(&mut self) {
        self.delta.next();
        self.merged = None;
    }

    // Folds the batch entries at the current delta key. Returns true if the
    // result is a tombstone (the key is suppressed and iteration
    // continues). On a merge failure the error is latched and false is
    // returned so the iterator surfaces it.
    fn process_delta(&mut self) -> bool {
        let Some(key) = self.delta.key() else {
            return true;
        };
        self.delta_key = key.to_vec();

        let mut base = IterGetter {
            iter: if self.equal_keys { Some(&self.base) } else { None },
        };
        if let Err(e) = process_delta_key(&mut base, &mut self.delta, &self.delta_key, &mut self.merged)
        {
            warn!(error = %e, "unable to merge batch records");
            self.status = Some(e);
            return false;
        }

        // The fold advanced past the key's last entry; back the delta up so
        // the caller's advance lands correctly.
        if self.delta.valid() {
            self.delta.prev();
        } else {
            self.delta.seek_to_last();
        }

        self.merged.is_none()
    }

    fn maybe_save_prefix_start(&mut self) {
        if self.prefix_same_as_start {
            self.prefix_start = if self.valid() {
                self.key().map(|k| key_prefix(k).to_vec())
            } else {
                None
            };
        }
    }

    // Whether `key` falls outside the prefix being iterated over.
    fn outside_prefix(&self, key: &[u8]) -> bool {
        match &self.prefix_start {
            Some(prefix) => key_prefix(key) != prefix.as_slice(),
            None => false,
        }
    }

    // Advances either or both iterators until they expose the next
    // non-deleted entry, overlaying delta state on the base.
    fn update_current(&mut self, check_prefix: bool) {
        self.merged = None;

        loop {
            self.equal_keys = false;

            if !self.base.valid() {
                if !self.delta.valid() {
                    return;
                }
                if check_prefix {
                    if let Some(delta_key) = self.delta.key() {
                        if self.outside_prefix(delta_key) {
                            // Past the restricted prefix; base is already
                            // invalid so pointing at it ends iteration.
                            self.current_at_base = true;
                            return;
                        }
                    }
                }
                if !self.process_delta() {
                    self.current_at_base = false;
                    return;
                }
                self.advance_delta();
                continue;
            }

            if !self.delta.valid() {
                self.current_at_base = true;
                return;
            }

            let cmp = match (self.delta.key(), self.base.key()) {
                (Some(d), Some(b)) => mvcc_compare(d, b),
                _ => {
                    self.current_at_base = true;
                    return;
                }
            };
            if cmp == std::cmp::Ordering::Greater {
                self.current_at_base = true;
                return;
            }
            if cmp == std::cmp::Ordering::Equal {
                self.equal_keys = true;
            }
            if !self.process_delta() {
                self.current_at_base = false;
                return;
            }

            // Delta produced a tombstone at or below the base key; skip it.
            self.advance_delta();
            if self.equal_keys {
                self.base.next();
            }
        }
    }
}

impl EngineIter for OverlayIter<'_> {
    fn seek(&mut self, key: &[u8]) {
        if self.prefix_same_as_start {
            self.prefix_start = Some(key_prefix(key).to_vec());
        }
        self.base.seek(key);
        self.delta.seek(key);
        self.update_current(self.prefix_same_as_start);

        if self.prefix_same_as_start && !self.valid() {
            self.prefix_start = None;
        }
    }

    fn seek_for_prev(&mut self, _key: &[u8]) {
        self.status = Some(StorageError::Unsupported(
            "seek_for_prev not supported on batch iterators",
        ));
    }

    fn seek_to_first(&mut self) {
        self.prefix_start = None;
        self.base.seek_to_first();
        self.delta.seek_to_first();
        self.update_current(false);
        self.maybe_save_prefix_start();
    }

    fn seek_to_last(&mut self) {
        self.prefix_start = None;
        self.base.seek_to_last();
        self.delta.seek_to_last();
        self.update_current(false);
        self.maybe_save_prefix_start();
    }

    fn next(&mut self) {
        if !self.valid() {
            self.status = Some(StorageError::Unsupported("next on invalid iterator"));
            return;
        }
        self.advance();
    }

    fn prev(&mut self) {
        self.status = Some(StorageError::Unsupported(
            "prev not supported on batch iterators",
        ));
    }

    fn valid(&self) -> bool {
        self.status.is_none()
            && if self.current_at_base {
                self.base.valid()
            } else {
                self.delta.valid()
            }
    }

    fn key(&self) -> Option<&[u8]> {
        if !self.valid() {
            return None;
        }
        if self.current_at_base {
            self.base.key()
        } else {
            Some(&self.delta_key)
        }
    }

    fn value(&self) -> Option<&[u8]> {
        if !self.valid() {
            return None;
        }
        if self.current_at_base {
            self.base.value()
        } else {
            self.merged.as_deref()
        }
    }

    fn status(&self) -> Result<(), StorageError> {
        match &self.status {
            None => self.base.status(),
            Some(StorageError::Unsupported(msg)) => Err(StorageError::Unsupported(msg)),
            Some(e) => Err(StorageError::Corruption(e.to_string())),
        }
    }
}
