//! Byte ranges removed from one buffer.

use crate::document::BufferView;
use crate::util::{Error, Result};

/// Half-open byte range `[offset, offset + length)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    #[inline]
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn of_view(view: &BufferView) -> Self {
        Self::new(view.offset(), view.byte_length)
    }

    /// One past the last byte. Saturates, so an overflowing range never fits a buffer.
    #[inline]
    pub const fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    #[inline]
    pub fn intersects(&self, other: &ByteRange) -> bool {
        self.length > 0 && other.length > 0 && self.offset < other.end() && other.offset < self.end()
    }
}

/// Sorted, non-overlapping ranges scheduled for removal from a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedRanges {
    buffer: usize,
    ranges: Vec<ByteRange>,
    /// `prefix[i]` is the total length of `ranges[..i]`.
    prefix: Vec<u64>,
}

impl RemovedRanges {
    /// Sort and validate. Identical ranges collapse into one; empty ranges
    /// are dropped; any other overlap is an error.
    pub fn new(buffer: usize, ranges: impl IntoIterator<Item = ByteRange>) -> Result<Self> {
        let mut ranges: Vec<ByteRange> = ranges.into_iter().filter(|r| r.length > 0).collect();
        ranges.sort_unstable();
        ranges.dedup();

        for pair in ranges.windows(2) {
            if pair[0].intersects(&pair[1]) {
                return Err(overlap(buffer, &pair[0], &pair[1]));
            }
        }

        let mut prefix = Vec::with_capacity(ranges.len() + 1);
        let mut total = 0;
        prefix.push(0);
        for r in &ranges {
            total += r.length;
            prefix.push(total);
        }

        Ok(Self { buffer, ranges, prefix })
    }

    #[inline]
    pub fn buffer(&self) -> usize {
        self.buffer
    }

    #[inline]
    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total bytes removed.
    #[inline]
    pub fn total(&self) -> u64 {
        self.prefix[self.ranges.len()]
    }

    /// One past the highest removed byte.
    pub fn end(&self) -> u64 {
        self.ranges.last().map_or(0, ByteRange::end)
    }

    /// Fail if a surviving range shares bytes with a removed one.
    pub fn check_survivor(&self, survivor: &ByteRange) -> Result<()> {
        match self.ranges.iter().find(|r| r.intersects(survivor)) {
            Some(r) => Err(overlap(self.buffer, r, survivor)),
            None => Ok(()),
        }
    }

    /// Bytes removed strictly before `offset`.
    pub fn removed_before(&self, offset: u64) -> u64 {
        let n = self.ranges.partition_point(|r| r.offset < offset);
        self.prefix[n]
    }

    /// Where a surviving offset lands once the ranges are gone.
    #[inline]
    pub fn map_offset(&self, offset: u64) -> u64 {
        offset - self.removed_before(offset)
    }

    /// Cut the ranges out of `bytes`, highest offset first.
    pub fn apply(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let end = self.end();
        if end > bytes.len() as u64 {
            return Err(Error::out_of_bounds(
                format!("removed range in buffer {}", self.buffer),
                end,
                bytes.len() as u64,
            ));
        }
        let mut out = bytes.to_vec();
        for r in self.ranges.iter().rev() {
            out.drain(r.offset as usize..r.end() as usize);
        }
        Ok(out)
    }
}

fn overlap(buffer: usize, a: &ByteRange, b: &ByteRange) -> Error {
    Error::OverlappingRanges {
        buffer,
        first_offset: a.offset,
        first_length: a.length,
        second_offset: b.offset,
        second_length: b.length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_two_ranges() {
        let ranges = RemovedRanges::new(0, [ByteRange::new(300, 20), ByteRange::new(100, 50)]).unwrap();
        assert_eq!(ranges.total(), 70);
        assert_eq!(ranges.map_offset(0), 0);
        assert_eq!(ranges.map_offset(200), 150);
        assert_eq!(ranges.map_offset(400), 330);

        let bytes: Vec<u8> = (0..500u32).map(|i| (i % 256) as u8).collect();
        let out = ranges.apply(&bytes).unwrap();
        assert_eq!(out.len(), 430);
        assert_eq!(out[100], bytes[150]);
        assert_eq!(out[330], bytes[400]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let ranges = RemovedRanges::new(0, [ByteRange::new(8, 8), ByteRange::new(8, 8), ByteRange::new(4, 0)]).unwrap();
        assert_eq!(ranges.ranges().len(), 1);
        assert_eq!(ranges.total(), 8);
    }

    #[test]
    fn test_partial_overlap_rejected() {
        let err = RemovedRanges::new(2, [ByteRange::new(0, 16), ByteRange::new(8, 16)]).unwrap_err();
        assert!(matches!(err, Error::OverlappingRanges { buffer: 2, .. }));
    }

    #[test]
    fn test_survivor_overlap_rejected() {
        let ranges = RemovedRanges::new(0, [ByteRange::new(100, 50)]).unwrap();
        assert!(ranges.check_survivor(&ByteRange::new(150, 10)).is_ok());
        assert!(ranges.check_survivor(&ByteRange::new(0, 100)).is_ok());
        assert!(ranges.check_survivor(&ByteRange::new(140, 20)).is_err());
    }

    #[test]
    fn test_range_past_end() {
        let ranges = RemovedRanges::new(0, [ByteRange::new(10, 10)]).unwrap();
        assert!(matches!(ranges.apply(&[0; 12]), Err(Error::ViewOutOfBounds { .. })));
    }

    #[test]
    fn test_range_end_saturates() {
        let huge = ByteRange::new(u64::MAX - 1, 8);
        assert_eq!(huge.end(), u64::MAX);
        assert!(huge.intersects(&ByteRange::new(u64::MAX - 2, 2)));
        let ranges = RemovedRanges::new(0, [huge]).unwrap();
        assert!(matches!(ranges.apply(&[0; 12]), Err(Error::ViewOutOfBounds { .. })));
    }
}
