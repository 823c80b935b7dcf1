//! Byte census of guest linear memory, taken around the heap test.

use std::fmt;
use std::ops::Range;

/// Byte counts over guest linear memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapCensus {
    /// Bytes examined.
    pub scanned: usize,
    /// Bytes other than zero.
    pub non_zero: usize,
    /// Bytes equal to the fill byte.
    pub filled: usize,
}

impl HeapCensus {
    /// Counts `data`, leaving out the `skip` range (a revoked guard page).
    #[must_use]
    pub fn take(data: &[u8], skip: Option<Range<usize>>, fill: u8) -> Self {
        let (head, tail) = match skip {
            Some(range) => (
                data.get(..range.start).unwrap_or(data),
                data.get(range.end..).unwrap_or_default(),
            ),
            None => (data, &[][..]),
        };
        head.iter()
            .chain(tail)
            .fold(Self::default(), |census, byte| Self {
                scanned: census.scanned + 1,
                non_zero: census.non_zero + usize::from(*byte != 0),
                filled: census.filled + usize::from(*byte == fill),
            })
    }
}

impl fmt::Display for HeapCensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes, {} non-zero, {} filled",
            self.scanned, self.non_zero, self.filled
        )
    }
}
