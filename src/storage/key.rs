// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! MVCC key encoding, decoding and ordering.
//!
//! MVCC keys are encoded as `<key>[<wall_time>[<logical>]]<#timestamp-bytes>`.
//! The trailer byte records how many bytes sit between the end of the user
//! key and the trailer, so a key can be split without knowing its contents.
//! When a timestamp is present a single NUL byte separates it from the user
//! key, which guarantees the user-key portion always ends in NUL and gives
//! the prefix extractor a clean boundary.
//!
//! Encoded keys do not sort correctly under plain byte comparison; the
//! custom comparator below orders them by user key ascending, then timestamp
//! descending, with the empty (metadata) timestamp first.

use std::cmp::Ordering;

use crate::time::Timestamp;

/// Comparator name persisted in the RocksDB manifest. Never change this.
pub const COMPARATOR_NAME: &str = "cockroach_comparator";

/// Prefix extractor name persisted in the RocksDB manifest. Never change
/// this.
pub const PREFIX_EXTRACTOR_NAME: &str = "cockroach_prefix_extractor";

/// Encoded size of a full version timestamp: 8 bytes of wall time plus 4
/// bytes of logical counter.
pub const MVCC_VERSION_TIMESTAMP_SIZE: usize = 12;

/// Appends the big-endian timestamp encoding to `buf`. The logical component
/// is written only when non-zero.
pub fn encode_timestamp_into(buf: &mut Vec<u8>, ts: Timestamp) {
    buf.extend_from_slice(&(ts.wall_time as u64).to_be_bytes());
    if ts.logical != 0 {
        buf.extend_from_slice(&(ts.logical as u32).to_be_bytes());
    }
}

/// Returns the bare timestamp encoding (8 or 12 bytes).
pub fn encode_timestamp(ts: Timestamp) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MVCC_VERSION_TIMESTAMP_SIZE);
    encode_timestamp_into(&mut buf, ts);
    buf
}

/// Encodes a user key and timestamp into an MVCC key. The zero timestamp
/// produces a metadata key with no timestamp section.
pub fn encode_key(user_key: &[u8], ts: Timestamp) -> Vec<u8> {
    let has_ts = !ts.is_zero();
    let mut buf = Vec::with_capacity(
        user_key.len() + 1 + if has_ts { 1 + MVCC_VERSION_TIMESTAMP_SIZE } else { 0 },
    );
    buf.extend_from_slice(user_key);
    if has_ts {
        // NUL separator between user key and timestamp data. See
        // `key_prefix` for why the user-key portion must end in NUL.
        buf.push(0);
        encode_timestamp_into(&mut buf, ts);
    }
    buf.push((buf.len() - user_key.len()) as u8);
    buf
}

/// Splits an encoded key into its user-key portion and its timestamp
/// section (still carrying the NUL separator when non-empty). Returns `None`
/// for malformed input.
pub fn split_key(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    if buf.is_empty() {
        return None;
    }
    let ts_size = buf[buf.len() - 1] as usize;
    if ts_size >= buf.len() {
        return None;
    }
    let key_len = buf.len() - ts_size - 1;
    Some((&buf[..key_len], &buf[key_len..buf.len() - 1]))
}

/// Decodes a bare timestamp section (without the NUL separator). Only 8 and
/// 12 byte encodings are well-formed.
pub fn decode_timestamp(ts: &[u8]) -> Option<Timestamp> {
    match ts.len() {
        8 => {
            let wall = u64::from_be_bytes(ts.try_into().ok()?);
            Some(Timestamp::new(wall as i64, 0))
        }
        12 => {
            let wall = u64::from_be_bytes(ts[..8].try_into().ok()?);
            let logical = u32::from_be_bytes(ts[8..].try_into().ok()?);
            Some(Timestamp::new(wall as i64, logical as i32))
        }
        _ => None,
    }
}

/// Decodes an encoded key into its user key and timestamp. Metadata keys
/// decode to the zero timestamp.
pub fn decode_key(buf: &[u8]) -> Option<(&[u8], Timestamp)> {
    let (user_key, ts) = split_key(buf)?;
    if ts.is_empty() {
        return Some((user_key, Timestamp::ZERO));
    }
    // Consume the NUL separator before decoding.
    let ts = decode_timestamp(&ts[1..])?;
    Some((user_key, ts))
}

/// Returns the bloom/prefix-seek prefix for an encoded key: the user key
/// plus its trailing NUL. Malformed keys are returned unchanged so that
/// transformed prefixes stay comparable with ordinary encoded keys.
pub fn key_prefix(src: &[u8]) -> &[u8] {
    match split_key(src) {
        Some((user_key, _)) => &src[..user_key.len() + 1],
        None => src,
    }
}

/// Prefix-extractor domain predicate: every key is in domain.
pub fn prefix_in_domain(_src: &[u8]) -> bool {
    true
}

/// Returns true if `src` is itself an extracted prefix.
pub fn prefix_in_range(src: &[u8]) -> bool {
    key_prefix(src) == src
}

/// Orders two encoded MVCC keys: user key ascending, then timestamp
/// descending so the newest version sorts first; the empty (metadata)
/// timestamp sorts before any version. Keys that fail to split fall back to
/// plain byte comparison.
pub fn mvcc_compare(a: &[u8], b: &[u8]) -> Ordering {
    let (Some((key_a, ts_a)), Some((key_b, ts_b))) = (split_key(a), split_key(b)) else {
        return a.cmp(b);
    };

    match key_a.cmp(key_b) {
        Ordering::Equal => {}
        c => return c,
    }
    if ts_a.is_empty() {
        if ts_b.is_empty() {
            Ordering::Equal
        } else {
            Ordering::Less
        }
    } else if ts_b.is_empty() {
        Ordering::Greater
    } else {
        ts_b.cmp(ts_a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metadata_key() {
        let encoded = encode_key(b"foo", Timestamp::ZERO);
        assert_eq!(encoded, b"foo\x00");
    }

    #[test]
    fn test_trailer_sizes() {
        assert_eq!(*encode_key(b"k", Timestamp::ZERO).last().unwrap(), 0);
        assert_eq!(*encode_key(b"k", Timestamp::new(5, 0)).last().unwrap(), 9);
        assert_eq!(*encode_key(b"k", Timestamp::new(5, 3)).last().unwrap(), 13);
    }

    #[test]
    fn test_roundtrip() {
        for ts in [
            Timestamp::ZERO,
            Timestamp::new(1, 0),
            Timestamp::new(1, 2),
            Timestamp::new(i64::MAX, i32::MAX),
        ] {
            let encoded = encode_key(b"some key", ts);
            let (user_key, decoded) = decode_key(&encoded).unwrap();
            assert_eq!(user_key, b"some key");
            assert_eq!(decoded, ts);
        }
    }

    #[test]
    fn test_split_rejects_malformed() {
        assert!(split_key(b"").is_none());
        // Trailer claims more timestamp bytes than exist.
        assert!(split_key(&[0x61, 0x05]).is_none());
    }

    #[test]
    fn test_decode_rejects_bad_timestamp_width() {
        // User key "a", NUL separator, 3 timestamp bytes, trailer 4.
        let buf = [b'a', 0, 1, 2, 3, 4];
        assert!(split_key(&buf).is_some());
        assert!(decode_key(&buf).is_none());
    }

    #[test]
    fn test_metadata_sorts_before_versions() {
        let meta = encode_key(b"a", Timestamp::ZERO);
        let versioned = encode_key(b"a", Timestamp::new(10, 0));
        assert_eq!(mvcc_compare(&meta, &versioned), Ordering::Less);
        assert_eq!(mvcc_compare(&versioned, &meta), Ordering::Greater);
        assert_eq!(mvcc_compare(&meta, &meta), Ordering::Equal);
    }

    #[test]
    fn test_newer_versions_sort_first() {
        let old = encode_key(b"a", Timestamp::new(10, 0));
        let new = encode_key(b"a", Timestamp::new(20, 0));
        assert_eq!(mvcc_compare(&new, &old), Ordering::Less);

        let logical_old = encode_key(b"a", Timestamp::new(10, 1));
        let logical_new = encode_key(b"a", Timestamp::new(10, 2));
        assert_eq!(mvcc_compare(&logical_new, &logical_old), Ordering::Less);
    }

    #[test]
    fn test_user_key_dominates_timestamp() {
        let a = encode_key(b"a", Timestamp::new(100, 0));
        let b = encode_key(b"b", Timestamp::new(1, 0));
        assert_eq!(mvcc_compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_per_key_order() {
        // [metadata, newest, ..., oldest] for a fixed user key.
        let mut keys = vec![
            encode_key(b"k", Timestamp::new(1, 0)),
            encode_key(b"k", Timestamp::new(3, 0)),
            encode_key(b"k", Timestamp::ZERO),
            encode_key(b"k", Timestamp::new(2, 5)),
        ];
        keys.sort_by(|a, b| mvcc_compare(a, b));
        assert_eq!(keys[0], encode_key(b"k", Timestamp::ZERO));
        assert_eq!(keys[1], encode_key(b"k", Timestamp::new(3, 0)));
        assert_eq!(keys[2], encode_key(b"k", Timestamp::new(2, 5)));
        assert_eq!(keys[3], encode_key(b"k", Timestamp::new(1, 0)));
    }

    #[test]
    fn test_key_prefix_stable_across_timestamps() {
        let expected = b"user\x00".as_slice();
        assert_eq!(key_prefix(&encode_key(b"user", Timestamp::ZERO)), expected);
        assert_eq!(
            key_prefix(&encode_key(b"user", Timestamp::new(9, 0))),
            expected
        );
        assert_eq!(
            key_prefix(&encode_key(b"user", Timestamp::new(9, 9))),
            expected
        );
    }

    #[test]
    fn test_key_prefix_of_malformed_key() {
        let malformed = [0x61, 0x05];
        assert_eq!(key_prefix(&malformed), &malformed);
    }

    #[test]
    fn test_prefix_in_range() {
        let encoded = encode_key(b"user", Timestamp::new(9, 0));
        assert!(!prefix_in_range(&encoded));
        assert!(prefix_in_range(key_prefix(&encoded)));
    }
}
