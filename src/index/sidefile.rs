//! Persisted index.
//!
//! Layout, little-endian: magic `VDKIDX01`, entry count (`u64`), then one
//! 20-byte record per entry: tag, flags (`u32`), offset (`u64`), length (`u32`).

use super::IndexEntry;
use crate::av::FourCC;
use crate::error::{DemuxError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::info;
use std::path::Path;

pub const MAGIC: &[u8; 8] = b"VDKIDX01";
const RECORD_LEN: usize = 20;

pub fn encode(entries: &[IndexEntry]) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + entries.len() * RECORD_LEN);
    buf.put_slice(MAGIC);
    buf.put_u64_le(entries.len() as u64);
    for e in entries {
        buf.put_slice(e.tag.as_bytes());
        buf.put_u32_le(e.flags);
        buf.put_u64_le(e.offset);
        buf.put_u32_le(e.len);
    }
    buf.freeze()
}

pub fn decode(mut data: Bytes) -> Result<Vec<IndexEntry>> {
    if data.len() < 16 || &data[..8] != MAGIC {
        return Err(DemuxError::IndexRejected("not an index file".into()));
    }
    data.advance(8);
    let count = data.get_u64_le();
    let expected = (count as usize).checked_mul(RECORD_LEN);
    if expected != Some(data.remaining()) {
        return Err(DemuxError::IndexRejected(format!(
            "index file declares {} entries but holds {} bytes",
            count,
            data.remaining()
        )));
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut tag = [0u8; 4];
        data.copy_to_slice(&mut tag);
        let flags = data.get_u32_le();
        let offset = data.get_u64_le();
        let len = data.get_u32_le();
        entries.push(IndexEntry::new(FourCC(tag), offset, len, flags));
    }
    Ok(entries)
}

pub fn save<P: AsRef<Path>>(path: P, entries: &[IndexEntry]) -> Result<()> {
    std::fs::write(path.as_ref(), encode(entries))?;
    info!(
        "saved {} index entries to {}",
        entries.len(),
        path.as_ref().display()
    );
    Ok(())
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<IndexEntry>> {
    let data = std::fs::read(path.as_ref())?;
    let entries = decode(Bytes::from(data))?;
    info!(
        "loaded {} index entries from {}",
        entries.len(),
        path.as_ref().display()
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::AVIIF_KEYFRAME;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_file_round_trip() {
        let entries = vec![
            IndexEntry::new(FourCC::new(b"00dc"), 2048, 1000, AVIIF_KEYFRAME),
            IndexEntry::new(FourCC::new(b"01wb"), 3056, 418, AVIIF_KEYFRAME),
            IndexEntry::new(FourCC::new(b"00dc"), 1 << 33, 77, 0),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.idx");

        save(&path, &entries).unwrap();
        assert_eq!(load(&path).unwrap(), entries);
    }

    #[test]
    fn test_rejects_bad_files() {
        assert!(matches!(
            decode(Bytes::from_static(b"MPIDX1\0\0\0\0\0\0\0\0\0\0")),
            Err(DemuxError::IndexRejected(_))
        ));

        let mut truncated = encode(&[IndexEntry::new(FourCC::new(b"00dc"), 1, 2, 0)]).to_vec();
        truncated.pop();
        assert!(decode(Bytes::from(truncated)).is_err());
    }

    #[quickcheck]
    fn prop_reload_equals_written(raw: Vec<(u32, u64, u32, u32)>) -> bool {
        let entries: Vec<IndexEntry> = raw
            .into_iter()
            .map(|(tag, offset, len, flags)| IndexEntry::new(FourCC::from_le_u32(tag), offset, len, flags))
            .collect();
        decode(encode(&entries)).map(|e| e == entries).unwrap_or(false)
    }
}
