// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The MVCC scanner: point gets and forward/reverse range scans.
//!
//! MVCC data is sorted by user key and descending timestamp, with a key's
//! metadata row (zero timestamp) first. A key written by an uncommitted
//! transaction carries a metadata row whose `txn` is set, the write intent:
//!
//! ```text
//!   a @ t3
//!   a @ t2
//!   a @ t1
//!   b <intent @ t2>
//!   b @ t2
//! ```
//!
//! Scanning resolves, per key, the newest version visible at the read
//! timestamp, honoring intents according to the read mode: an inconsistent
//! read collects the intent and reads below it; a consistent read collects
//! conflicting intents for the caller to resolve; a transactional read sees
//! its own intents at their provisional timestamps.
//!
//! The scanner never reads the engine iterator's entry views directly
//! across movements: the current entry is copied into owned buffers, which
//! also backs the one-entry lookback (`peeked`) that reverse scans use.

use crate::time::Timestamp;

use super::error::StorageError;
use super::iter::EngineIter;
use super::key::{encode_key, split_key};
use super::value::Metadata;

// Number of calls to next/prev to try when looking for the next key or a
// particular version before falling back to a seek. The scanner adapts
// within [1, MAX_ITERS_BEFORE_SEEK]: incremented when stepping succeeds,
// decremented on each fallback seek.
const MAX_ITERS_BEFORE_SEEK: usize = 10;

/// Identity of the transaction a scan runs inside.
#[derive(Debug, Clone, Default)]
pub struct TxnInfo {
    pub id: Vec<u8>,
    pub epoch: u32,
    /// Upper bound of the transaction's clock uncertainty window.
    pub max_timestamp: Timestamp,
}

/// The outcome of a scan or get.
#[derive(Debug, Default)]
pub struct ScanResults {
    /// Visible versions: `(encoded key, value)` pairs in scan order.
    pub kvs: Vec<(Vec<u8>, Vec<u8>)>,
    /// Intents observed along the way: `(encoded metadata key, encoded
    /// metadata)` pairs.
    pub intents: Vec<(Vec<u8>, Vec<u8>)>,
    /// Set when a version above the read timestamp but inside the txn's
    /// uncertainty window was observed; the caller must restart at or above
    /// this timestamp. `kvs` and `intents` are cleared.
    pub uncertainty_timestamp: Option<Timestamp>,
}

/// Scans `[start, end)` at `timestamp`, returning at most `max_keys + 1`
/// rows (the extra row lets callers construct a resume position). A reverse
/// scan returns rows from the last key below `end` down to `start`.
#[allow(clippy::too_many_arguments)]
pub fn mvcc_scan<I: EngineIter>(
    iter: &mut I,
    start: &[u8],
    end: &[u8],
    timestamp: Timestamp,
    max_keys: i64,
    txn: Option<&TxnInfo>,
    consistent: bool,
    reverse: bool,
) -> Result<ScanResults, StorageError> {
    if reverse {
        MvccScanner::new(iter, end, start, timestamp, max_keys, txn, consistent, true).scan()
    } else {
        MvccScanner::new(iter, start, end, timestamp, max_keys, txn, consistent, false).scan()
    }
}

/// Reads the single key `key` at `timestamp`. Implemented as a scan
/// retrieving one key, with an empty end key so no other key can match.
pub fn mvcc_get<I: EngineIter>(
    iter: &mut I,
    key: &[u8],
    timestamp: Timestamp,
    txn: Option<&TxnInfo>,
    consistent: bool,
) -> Result<ScanResults, StorageError> {
    MvccScanner::new(iter, key, &[], timestamp, 0, txn, consistent, false).get()
}

struct MvccScanner<'a, I: EngineIter> {
    iter: &'a mut I,
    start_key: Vec<u8>,
    end_key: Vec<u8>,
    max_keys: i64,
    timestamp: Timestamp,
    txn_id: Vec<u8>,
    txn_epoch: u32,
    txn_max_timestamp: Timestamp,
    consistent: bool,
    check_uncertainty: bool,
    reverse: bool,

    kvs: Vec<(Vec<u8>, Vec<u8>)>,
    intents: Vec<(Vec<u8>, Vec<u8>)>,
    uncertainty: Option<Timestamp>,

    // Scratch for the key being stepped over or sought.
    key_buf: Vec<u8>,
    // Whether the engine iterator has been stepped one entry behind the
    // logical position (reverse lookback).
    peeked: bool,
    // Owned copies of the logical current entry; valid regardless of
    // engine-iterator movement while peeking.
    cur_raw_key: Vec<u8>,
    cur_key_len: usize,
    cur_value: Vec<u8>,
    cur_timestamp: Timestamp,
    iters_before_seek: usize,
}

impl<'a, I: EngineIter> MvccScanner<'a, I> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        iter: &'a mut I,
        start: &[u8],
        end: &[u8],
        timestamp: Timestamp,
        max_keys: i64,
        txn: Option<&TxnInfo>,
        consistent: bool,
        reverse: bool,
    ) -> Self {
        let (txn_id, txn_epoch, txn_max_timestamp) = match txn {
            Some(txn) => (txn.id.clone(), txn.epoch, txn.max_timestamp),
            None => (Vec::new(), 0, Timestamp::ZERO),
        };
        Self {
            iter,
            start_key: start.to_vec(),
            end_key: end.to_vec(),
            max_keys,
            timestamp,
            check_uncertainty: timestamp < txn_max_timestamp,
            txn_id,
            txn_epoch,
            txn_max_timestamp,
            consistent,
            reverse,
            kvs: Vec::new(),
            intents: Vec::new(),
            uncertainty: None,
            key_buf: Vec::new(),
            peeked: false,
            cur_raw_key: Vec::new(),
            cur_key_len: 0,
            cur_value: Vec::new(),
            cur_timestamp: Timestamp::ZERO,
            iters_before_seek: MAX_ITERS_BEFORE_SEEK / 2,
        }
    }

    fn get(mut self) -> Result<ScanResults, StorageError> {
        let seek_key = encode_key(&self.start_key, Timestamp::ZERO);
        if self.iter_seek(&seek_key)? && self.cur_key() == &self.start_key[..] {
            self.get_and_advance()?;
        }
        Ok(self.into_results())
    }

    fn scan(mut self) -> Result<ScanResults, StorageError> {
        let seek_key = encode_key(&self.start_key, Timestamp::ZERO);
        if self.reverse {
            if self.iter_seek_reverse(&seek_key)? {
                while self.cur_key() >= &self.end_key[..] {
                    if !self.get_and_advance()? {
                        break;
                    }
                }
            }
        } else if self.iter_seek(&seek_key)? {
            while self.cur_key() < &self.end_key[..] {
                if !self.get_and_advance()? {
                    break;
                }
            }
        }
        Ok(self.into_results())
    }

    fn into_results(self) -> ScanResults {
        ScanResults {
            kvs: self.kvs,
            intents: self.intents,
            uncertainty_timestamp: self.uncertainty,
        }
    }

    fn cur_key(&self) -> &[u8] {
        &self.cur_raw_key[..self.cur_key_len]
    }

    fn uncertainty_error(&mut self, ts: Timestamp) -> bool {
        self.uncertainty = Some(ts);
        self.kvs.clear();
        self.intents.clear();
        false
    }

    fn inc_iters(&mut self) {
        self.iters_before_seek = MAX_ITERS_BEFORE_SEEK.min(self.iters_before_seek + 1);
    }

    fn dec_iters(&mut self) {
        self.iters_before_seek = 1.max(self.iters_before_seek - 1);
    }

    fn get_and_advance(&mut self) -> Result<bool, StorageError> {
        let is_value = !self.cur_timestamp.is_zero();

        if is_value {
            if self.timestamp >= self.cur_timestamp {
                // 1. No intent, and the newest remaining version is at or
                // below our read timestamp.
                let value = self.cur_value.clone();
                return self.add_and_advance(value);
            }

            if self.check_uncertainty {
                // 2. The version is above our read timestamp and the txn's
                // uncertainty window is open.
                if self.txn_max_timestamp >= self.cur_timestamp {
                    return Ok(self.uncertainty_error(self.cur_timestamp));
                }
                // Versions between the read timestamp and the uncertainty
                // bound still raise uncertainty; seekVersion checks.
                return self.seek_version(self.txn_max_timestamp, true);
            }

            // 3. Skip down to the newest version at or below the read
            // timestamp.
            return self.seek_version(self.timestamp, false);
        }

        let meta = Metadata::decode(&self.cur_value)?;
        if let Some(raw_bytes) = meta.raw_bytes {
            // 4. Inline value; emit immediately.
            return self.add_and_advance(raw_bytes);
        }
        let Some(meta_txn) = meta.txn else {
            return Err(StorageError::IntentWithoutTxn);
        };

        let own_intent = meta_txn.id == self.txn_id;
        let meta_timestamp = meta.timestamp;

        if self.timestamp < meta_timestamp && !own_intent {
            // 5. Reading below an intent we don't own; the intent is
            // irrelevant, read the older versions. Our own intents are read
            // regardless of the read timestamp (case 8).
            return self.seek_version(self.timestamp, false);
        }

        if !self.consistent {
            // 6. Inconsistent read at or above a foreign intent: surface
            // the intent and read the instant just before it.
            self.intents
                .push((self.cur_raw_key.clone(), self.cur_value.clone()));
            return self.seek_version(meta_timestamp.prev(), false);
        }

        if !own_intent {
            // 7. Conflicting intent on a consistent read. Record it and
            // move on so every conflict in the range is returned together.
            self.intents
                .push((self.cur_raw_key.clone(), self.cur_value.clone()));
            return self.advance_key();
        }

        if self.txn_epoch == meta_txn.epoch {
            // 8. Our own intent. Read at the intent timestamp, not the read
            // timestamp: the intent may have been pushed forward, and a txn
            // always observes its own writes.
            return self.seek_version(meta_timestamp, false);
        }

        if self.txn_epoch < meta_txn.epoch {
            // 9. Our own intent, but from a newer epoch than ours; this
            // incarnation of the txn must abort.
            return Err(StorageError::EpochMismatch {
                our_epoch: self.txn_epoch,
                intent_epoch: meta_txn.epoch,
            });
        }

        // 10. Our own intent from a prior epoch, superseded by the restart;
        // ignore it and read below.
        self.seek_version(meta_timestamp.prev(), false)
    }

    fn add_and_advance(&mut self, value: Vec<u8>) -> Result<bool, StorageError> {
        // Version tombstones are empty values; they hide the key without
        // producing a row.
        if !value.is_empty() {
            self.kvs.push((self.cur_raw_key.clone(), value));
            if self.kvs.len() as i64 > self.max_keys {
                return Ok(false);
            }
        }
        self.advance_key()
    }

    // Positions at the newest version of the current key with timestamp at
    // or below `desired`, stepping up to iters_before_seek times before
    // falling back to a seek. With `check_uncertainty`, any version above
    // the read timestamp raises uncertainty.
    fn seek_version(
        &mut self,
        desired: Timestamp,
        check_uncertainty: bool,
    ) -> Result<bool, StorageError> {
        self.save_cur_key();

        for _ in 0..self.iters_before_seek {
            if !self.iter_next()? {
                return self.advance_key_at_end();
            }
            if self.cur_key() != &self.key_buf[..] {
                self.inc_iters();
                return self.advance_key_at_new_key();
            }
            if desired >= self.cur_timestamp {
                self.inc_iters();
                if check_uncertainty && self.timestamp < self.cur_timestamp {
                    return Ok(self.uncertainty_error(self.cur_timestamp));
                }
                let value = self.cur_value.clone();
                return self.add_and_advance(value);
            }
        }

        self.dec_iters();
        let seek_key = encode_key(&self.key_buf, desired);
        if !self.iter_seek(&seek_key)? {
            return self.advance_key_at_end();
        }
        if self.cur_key() != &self.key_buf[..] {
            return self.advance_key_at_new_key();
        }
        if desired >= self.cur_timestamp {
            if check_uncertainty && self.timestamp < self.cur_timestamp {
                return Ok(self.uncertainty_error(self.cur_timestamp));
            }
            let value = self.cur_value.clone();
            return self.add_and_advance(value);
        }
        self.advance_key()
    }

    // Advances past all versions of the current key, stepping before
    // seeking as in seek_version.
    fn next_key(&mut self) -> Result<bool, StorageError> {
        // When the end key is exactly the next key, advancing cannot
        // surface another row; single-row reads hit this constantly.
        if self.end_key.len() == self.cur_key_len + 1
            && self.end_key[self.cur_key_len] == 0
            && self.end_key.starts_with(self.cur_key())
        {
            return Ok(false);
        }

        self.save_cur_key();

        for _ in 0..self.iters_before_seek {
            if !self.iter_next()? {
                return Ok(false);
            }
            if self.cur_key() != &self.key_buf[..] {
                self.inc_iters();
                return Ok(true);
            }
        }

        // Still on a version of the same key; seek past it. Two NULs: the
        // next possible user key, encoded with the empty-timestamp trailer.
        self.dec_iters();
        let mut seek_key = std::mem::take(&mut self.key_buf);
        seek_key.extend_from_slice(&[0, 0]);
        let res = self.iter_seek(&seek_key);
        self.key_buf = seek_key;
        res
    }

    // Backs up to the latest version of `key`. `start` carries the
    // iteration count already spent by the caller.
    fn backward_latest_version(&mut self, key: Vec<u8>, start: usize) -> Result<bool, StorageError> {
        self.key_buf = key;

        for _ in start..self.iters_before_seek {
            let Some(peeked) = self.iter_peek_prev()? else {
                return Ok(false);
            };
            if peeked != self.key_buf {
                // Key changed: the current position is the latest version.
                self.inc_iters();
                return Ok(true);
            }
            if !self.iter_prev()? {
                return Ok(false);
            }
        }

        self.dec_iters();
        // The metadata key of `key` is its user key plus the
        // empty-timestamp trailer.
        let mut seek_key = std::mem::take(&mut self.key_buf);
        seek_key.push(0);
        let res = self.iter_seek(&seek_key);
        self.key_buf = seek_key;
        res
    }

    // Backs up to the latest version of the key preceding `key`.
    fn prev_key(&mut self, key: Vec<u8>) -> Result<bool, StorageError> {
        if self.peeked {
            if let Some(raw) = self.iter.key() {
                if raw < self.end_key.as_slice() {
                    // The previous entry is already below the range.
                    return Ok(false);
                }
            }
        }

        self.key_buf = key;

        for i in 0..self.iters_before_seek {
            let Some(peeked) = self.iter_peek_prev()? else {
                return Ok(false);
            };
            if peeked != self.key_buf {
                return self.backward_latest_version(peeked, i + 1);
            }
            if !self.iter_prev()? {
                return Ok(false);
            }
        }

        self.dec_iters();
        let mut seek_key = std::mem::take(&mut self.key_buf);
        seek_key.push(0);
        let res = self.iter_seek_reverse(&seek_key);
        self.key_buf = seek_key;
        res
    }

    fn advance_key(&mut self) -> Result<bool, StorageError> {
        if self.reverse {
            let key = self.cur_key().to_vec();
            self.prev_key(key)
        } else {
            self.next_key()
        }
    }

    fn advance_key_at_end(&mut self) -> Result<bool, StorageError> {
        if self.reverse {
            // Advancing ran off the end of the key space; restart from the
            // very last entry.
            self.clear_peeked();
            self.iter.seek_to_last();
            if !self.update_current()? {
                return Ok(false);
            }
            self.advance_key()
        } else {
            Ok(false)
        }
    }

    fn advance_key_at_new_key(&mut self) -> Result<bool, StorageError> {
        if self.reverse {
            // Stepped onto the next user key; move back to the one before
            // the key we were on.
            let key = self.key_buf.clone();
            self.prev_key(key)
        } else {
            Ok(true)
        }
    }

    fn save_cur_key(&mut self) {
        let len = self.cur_key_len;
        self.key_buf.clear();
        self.key_buf.extend_from_slice(&self.cur_raw_key[..len]);
    }

    fn update_current(&mut self) -> Result<bool, StorageError> {
        if !self.iter.valid() {
            self.iter.status()?;
            return Ok(false);
        }
        let (Some(key), Some(value)) = (self.iter.key(), self.iter.value()) else {
            return Ok(false);
        };
        self.cur_raw_key.clear();
        self.cur_raw_key.extend_from_slice(key);
        self.cur_value.clear();
        self.cur_value.extend_from_slice(value);

        let Some((user_key, ts)) = super::key::decode_key(&self.cur_raw_key) else {
            return Err(StorageError::Corruption("failed to split mvcc key".into()));
        };
        let len = user_key.len();
        self.cur_key_len = len;
        self.cur_timestamp = ts;
        Ok(true)
    }

    // Positions at the first entry >= key.
    fn iter_seek(&mut self, key: &[u8]) -> Result<bool, StorageError> {
        self.clear_peeked();
        self.iter.seek(key);
        self.update_current()
    }

    // Positions at the latest version of the last key at or before `key`.
    fn iter_seek_reverse(&mut self, key: &[u8]) -> Result<bool, StorageError> {
        self.clear_peeked();
        self.iter.seek_for_prev(key);
        if !self.update_current()? {
            return Ok(false);
        }
        if self.cur_timestamp.is_zero() {
            // Landed on an intent or inline value, which is already the
            // first entry of its key.
            return Ok(true);
        }
        // Landed on a versioned row; back up to the key's latest version.
        let key = self.cur_key().to_vec();
        self.backward_latest_version(key, 0)
    }

    fn iter_next(&mut self) -> Result<bool, StorageError> {
        if self.reverse && self.peeked {
            // The engine iterator sits one entry behind the logical
            // position; step twice.
            self.peeked = false;
            self.iter.next();
            if !self.iter.valid() {
                self.iter.status()?;
                return Ok(false);
            }
        }
        self.iter.next();
        self.update_current()
    }

    fn iter_prev(&mut self) -> Result<bool, StorageError> {
        if self.peeked {
            self.peeked = false;
            return self.update_current();
        }
        self.iter.prev();
        self.update_current()
    }

    // Looks at the user key of the entry before the logical position,
    // stepping the engine iterator back without disturbing cur_*.
    fn iter_peek_prev(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        if !self.peeked {
            self.peeked = true;
            // cur_raw_key/cur_value are owned copies, so the engine
            // iterator is free to move beneath them.
            self.iter.prev();
            if !self.iter.valid() {
                self.iter.status()?;
                // Peeking must never leave the iterator invalid: reposition
                // at the first key and report an empty peeked key. This
                // makes the empty key unreachable by reverse scans.
                self.peeked = false;
                self.iter.seek_to_first();
                return Ok(if self.update_current()? {
                    Some(Vec::new())
                } else {
                    None
                });
            }
        }

        let Some(raw) = self.iter.key() else {
            return Ok(None);
        };
        let Some((user_key, _)) = split_key(raw) else {
            return Err(StorageError::Corruption("failed to split mvcc key".into()));
        };
        Ok(Some(user_key.to_vec()))
    }

    // Before any engine-iterator movement that re-establishes the position,
    // the lookback is dropped.
    fn clear_peeked(&mut self) {
        if self.reverse {
            self.peeked = false;
        }
    }
}
