//! Verification pattern written by the host into every segment.
//!
//! A segment of `size` bytes holds the three-byte access tag followed by a
//! colon (`ro:` or `rw:`), then bytes alternating with the index parity
//! (131 at even indices, 173 at odd ones), and ends with `buf`. Guests check
//! the pattern to prove the mapping shows the host's pages.

use crate::SegmentAccess;

const SUFFIX: &[u8; 3] = b"buf";
const PREFIX_LEN: usize = 3;

/// Smallest segment that can hold the prefix and the suffix.
pub const MIN_PATTERN_SIZE: usize = 6;

const fn prefix(access: SegmentAccess) -> [u8; PREFIX_LEN] {
    match access {
        SegmentAccess::ReadOnly => *b"ro:",
        SegmentAccess::ReadWrite => *b"rw:",
    }
}

const fn body_byte(index: usize) -> u8 {
    if index & 1 == 0 { 131 } else { 173 }
}

/// Builds the pattern for a segment, or `None` when `size` is below
/// [`MIN_PATTERN_SIZE`].
#[must_use]
pub fn verification_pattern(access: SegmentAccess, size: usize) -> Option<Vec<u8>> {
    if size < MIN_PATTERN_SIZE {
        return None;
    }
    let mut bytes = Vec::with_capacity(size);
    bytes.extend_from_slice(&prefix(access));
    bytes.extend((PREFIX_LEN..size - SUFFIX.len()).map(body_byte));
    bytes.extend_from_slice(SUFFIX);
    Some(bytes)
}

/// Checks `bytes` against the pattern the way guests do: `0` when it
/// matches, `1` for a wrong prefix, `2` for a wrong suffix, otherwise the
/// index of the first wrong body byte.
#[must_use]
pub fn check_verification_pattern(access: SegmentAccess, bytes: &[u8]) -> usize {
    let Some((head, rest)) = bytes.split_first_chunk::<PREFIX_LEN>() else {
        return 1;
    };
    if bytes.len() < MIN_PATTERN_SIZE || *head != prefix(access) {
        return 1;
    }
    let Some((body, tail)) = rest.split_last_chunk::<3>() else {
        return 2;
    };
    if tail != SUFFIX {
        return 2;
    }
    body.iter()
        .zip(PREFIX_LEN..)
        .find(|(byte, index)| **byte != body_byte(*index))
        .map_or(0, |(_, index)| index)
}
