//! # Seek indices
//!
//! Two shapes of index are produced by the drivers:
//!
//! - [`ChunkIndex`]: one [`IndexEntry`] per data record, sorted by byte
//!   offset. Built from an AVI OpenDML or `idx1` index, from a linear
//!   recovery scan, from a side-file, or from a container sample table.
//! - [`SyncpointTable`]: a sparse time-key to page-offset map for Ogg.

pub mod sidefile;
mod syncpoint;

pub use syncpoint::{Syncpoint, SyncpointTable};

use crate::av::FourCC;
use crate::io::DataRegion;
use log::debug;

/// Record is a list header.
pub const AVIIF_LIST: u32 = 0x01;
/// Record starts a decodable unit.
pub const AVIIF_KEYFRAME: u32 = 0x10;

/// Location of one data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub tag: FourCC,
    /// Absolute offset of the record header.
    pub offset: u64,
    /// Payload length.
    pub len: u32,
    pub flags: u32,
}

impl IndexEntry {
    pub fn new(tag: FourCC, offset: u64, len: u32, flags: u32) -> Self {
        Self {
            tag,
            offset,
            len,
            flags,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags & AVIIF_KEYFRAME != 0
    }

    pub fn stream_number(&self) -> Option<u32> {
        stream_number(self.tag)
    }
}

/// Stream number encoded in the two leading digits of an `NNxx` tag.
pub fn stream_number(tag: FourCC) -> Option<u32> {
    let [a, b, _, _] = tag.0;
    if a.is_ascii_digit() && b.is_ascii_digit() {
        Some(((a - b'0') * 10 + (b - b'0')) as u32)
    } else {
        None
    }
}

/// Data-record index ordered by offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkIndex {
    entries: Vec<IndexEntry>,
    dropped: usize,
}

impl ChunkIndex {
    /// Keeps the entries inside `region` and stable-sorts them by offset.
    pub fn build(mut entries: Vec<IndexEntry>, region: DataRegion) -> Self {
        let before = entries.len();
        entries.retain(|e| region.contains(e.offset));
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!("index: dropped {} entries outside {:?}", dropped, region);
        }
        entries.sort_by_key(|e| e.offset);
        Self { entries, dropped }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, i: usize) -> Option<&IndexEntry> {
        self.entries.get(i)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries discarded at build time for lying outside the data region.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn count_for_stream(&self, stream: u32) -> usize {
        self.entries
            .iter()
            .filter(|e| e.stream_number() == Some(stream))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_stream_number() {
        assert_eq!(stream_number(FourCC::new(b"01wb")), Some(1));
        assert_eq!(stream_number(FourCC::new(b"12dc")), Some(12));
        assert_eq!(stream_number(FourCC::new(b"ix00")), None);
    }

    #[test]
    fn test_build_is_stable_and_bounded() {
        let tag_a = FourCC::new(b"00dc");
        let tag_b = FourCC::new(b"01wb");
        let entries = vec![
            IndexEntry::new(tag_a, 300, 1, 0),
            IndexEntry::new(tag_a, 100, 1, AVIIF_KEYFRAME),
            IndexEntry::new(tag_b, 100, 2, 0),
            IndexEntry::new(tag_b, 5000, 2, 0),
            IndexEntry::new(tag_b, 10, 2, 0),
        ];
        let index = ChunkIndex::build(entries, DataRegion::new(50, 1000));

        assert_eq!(index.len(), 3);
        assert_eq!(index.dropped(), 2);
        assert_eq!(index.get(0).unwrap().tag, tag_a);
        assert_eq!(index.get(1).unwrap().tag, tag_b);
        assert_eq!(index.get(2).unwrap().offset, 300);
    }

    #[quickcheck]
    fn prop_built_index_sorted_and_in_region(offsets: Vec<u32>, start: u16, span: u16) -> bool {
        let region = DataRegion::new(start as u64, start as u64 + span as u64);
        let entries = offsets
            .iter()
            .map(|&o| IndexEntry::new(FourCC::new(b"00dc"), o as u64 % 70_000, 0, 0))
            .collect();
        let index = ChunkIndex::build(entries, region);
        index.entries().windows(2).all(|w| w[0].offset <= w[1].offset)
            && index.entries().iter().all(|e| region.contains(e.offset))
    }
}
