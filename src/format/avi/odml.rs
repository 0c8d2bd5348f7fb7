//! OpenDML two-level index: `indx` super indexes pointing at `ix##`
//! standard index chunks.

use super::header::{AviHeader, AVI_INDEX_OF_CHUNKS};
use crate::av::FourCC;
use crate::error::{DemuxError, Result};
use crate::index::{stream_number, IndexEntry, AVIIF_KEYFRAME};
use crate::io::{ByteSource, ByteSourceExt};
use bytes::Buf;
use log::{debug, info, warn};

const STD_INDEX_HEADER: usize = 24;
const SIZE_MASK: u32 = 0x7fff_ffff;
const DELTA_FRAME: u32 = 0x8000_0000;

/// Entries of one `ix##` chunk body.
pub fn decode_standard_index(mut data: &[u8]) -> Result<Vec<IndexEntry>> {
    if data.len() < STD_INDEX_HEADER {
        return Err(DemuxError::IndexRejected("standard index too short".into()));
    }
    let longs_per_entry = data.get_u16_le();
    let _sub_type = data.get_u8();
    let index_type = data.get_u8();
    let in_use = data.get_u32_le() as usize;
    let mut chunk_id = [0u8; 4];
    data.copy_to_slice(&mut chunk_id);
    let base = data.get_u64_le();
    let _reserved = data.get_u32_le();

    if index_type != AVI_INDEX_OF_CHUNKS || longs_per_entry != 2 {
        return Err(DemuxError::IndexRejected(format!(
            "standard index type {} with {} longs per entry",
            index_type, longs_per_entry
        )));
    }
    if in_use == 0 {
        return Err(DemuxError::IndexRejected("empty standard index".into()));
    }
    if data.remaining() < in_use * 8 {
        return Err(DemuxError::IndexRejected(format!(
            "standard index declares {} entries, holds {}",
            in_use,
            data.remaining() / 8
        )));
    }

    let tag = FourCC(chunk_id);
    let entries = (0..in_use)
        .map(|_| {
            let offset = data.get_u32_le();
            let size = data.get_u32_le();
            let flags = if size & DELTA_FRAME == 0 {
                AVIIF_KEYFRAME
            } else {
                0
            };
            IndexEntry::new(
                tag,
                (base + offset as u64).saturating_sub(8),
                size & SIZE_MASK,
                flags,
            )
        })
        .collect();
    Ok(entries)
}

/// Reads every standard index the super indexes point at. Any failure
/// rejects the whole OpenDML index.
pub fn read_index(src: &mut dyn ByteSource, header: &AviHeader) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    let mut blocks = 0;
    for stream in &header.streams {
        let Some(indx) = &stream.super_index else {
            continue;
        };
        for sup in &indx.entries {
            src.seek(sup.offset)?;
            let id = src.read_fourcc()?;
            let size = src.read_u32_le()?;
            if &id.0[..2] != b"ix" {
                return Err(DemuxError::IndexRejected(format!(
                    "expected ix## at {}, found {}",
                    sup.offset, id
                )));
            }
            let body = src.read_bytes(size as usize)?;
            let block = decode_standard_index(&body)?;
            debug!(
                "odml: stream {} block at {} with {} entries",
                stream.number,
                sup.offset,
                block.len()
            );
            entries.extend(block);
            blocks += 1;
        }
    }
    if blocks == 0 {
        return Err(DemuxError::IndexUnavailable);
    }
    info!("odml: {} entries from {} standard indexes", entries.len(), blocks);
    Ok(entries)
}

/// Rewrites the tag of every non-keyframe entry of `stream` when the first
/// of them turned out to carry `actual` on disk. Returns the number of
/// rewritten entries.
pub fn repair_delta_tags(entries: &mut [IndexEntry], stream: u32, actual: FourCC) -> usize {
    let Some(first) = entries
        .iter()
        .find(|e| !e.is_keyframe() && e.stream_number() == Some(stream))
    else {
        return 0;
    };
    if first.tag == actual || stream_number(actual) != Some(stream) {
        return 0;
    }

    let mut fixed = 0;
    for e in entries
        .iter_mut()
        .filter(|e| !e.is_keyframe() && e.stream_number() == Some(stream))
    {
        e.tag = actual;
        fixed += 1;
    }
    warn!(
        "odml: stream {} delta frames tagged {} on disk, rewrote {} entries",
        stream, actual, fixed
    );
    fixed
}

/// Reads the on-disk tag of the first non-keyframe entry of `stream`.
pub fn probe_delta_tag(
    src: &mut dyn ByteSource,
    entries: &[IndexEntry],
    stream: u32,
) -> Result<Option<FourCC>> {
    let Some(first) = entries
        .iter()
        .find(|e| !e.is_keyframe() && e.stream_number() == Some(stream))
    else {
        return Ok(None);
    };
    src.seek(first.offset)?;
    Ok(Some(src.read_fourcc()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn std_index(chunk_id: &[u8; 4], base: u64, items: &[(u32, u32)]) -> Vec<u8> {
        let mut data = vec![2, 0, 0, AVI_INDEX_OF_CHUNKS];
        data.extend_from_slice(&(items.len() as u32).to_le_bytes());
        data.extend_from_slice(chunk_id);
        data.extend_from_slice(&base.to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        for (offset, size) in items {
            data.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&size.to_le_bytes());
        }
        data
    }

    #[test]
    fn test_standard_index_offsets_and_flags() {
        let data = std_index(b"00dc", 1000, &[(8, 100), (116, 0x8000_0020)]);
        let entries = decode_standard_index(&data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, 1000);
        assert!(entries[0].is_keyframe());
        assert_eq!(entries[1].offset, 1108);
        assert_eq!(entries[1].len, 0x20);
        assert!(!entries[1].is_keyframe());
    }

    #[test]
    fn test_empty_or_truncated_rejected() {
        assert!(decode_standard_index(&std_index(b"00dc", 0, &[])).is_err());
        let mut data = std_index(b"00dc", 0, &[(8, 1), (20, 1)]);
        data.truncate(data.len() - 4);
        assert!(decode_standard_index(&data).is_err());
    }

    #[test]
    fn test_repair_first_occurrence_decides() {
        let dc = FourCC::new(b"00dc");
        let db = FourCC::new(b"00db");
        let wb = FourCC::new(b"01wb");
        let mut entries = vec![
            IndexEntry::new(dc, 10, 5, AVIIF_KEYFRAME),
            IndexEntry::new(wb, 20, 5, 0),
            IndexEntry::new(dc, 30, 5, 0),
            IndexEntry::new(dc, 40, 5, 0),
            IndexEntry::new(dc, 50, 5, AVIIF_KEYFRAME),
        ];
        assert_eq!(repair_delta_tags(&mut entries, 0, db), 2);
        let tags: Vec<FourCC> = entries.iter().map(|e| e.tag).collect();
        assert_eq!(tags, vec![dc, wb, db, db, dc]);

        assert_eq!(repair_delta_tags(&mut entries, 0, db), 0);
        assert_eq!(repair_delta_tags(&mut entries, 0, FourCC::new(b"JUNK")), 0);
    }
}
