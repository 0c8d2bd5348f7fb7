//! # AVI
//!
//! RIFF `AVI ` files including OpenDML (`AVIX` continuation lists and
//! two-level indexes) and the non-interleaved layouts some muxers produce.
//!
//! The index is taken, in order, from a side-file, the OpenDML super
//! indexes, the legacy `idx1` chunk, or a linear scan of the data region,
//! depending on [`crate::config::IndexMode`].

mod demuxer;
pub mod header;
pub mod odml;
pub mod recover;

pub use demuxer::AviDemuxer;

use super::{DemuxContext, FormatDemuxer, FormatDriver, Probe};
use crate::av::FourCC;
use crate::error::Result;
use crate::io::ByteSource;

pub struct AviDriver;

impl FormatDriver for AviDriver {
    fn name(&self) -> &'static str {
        "avi"
    }

    fn probe(&self, source: &mut dyn ByteSource, _probe_size: usize) -> Result<Probe> {
        let head = source.peek(12)?;
        if head.len() < 12 {
            return Ok(Probe::No);
        }
        let riff = &head[..4] == b"RIFF" || &head[..4] == b"ON2 ";
        let form = matches!(&head[8..12], b"AVI " | b"AVI\x19" | b"ON2f");
        Ok(if riff && form { Probe::Definite } else { Probe::No })
    }

    fn open(&self, ctx: &mut DemuxContext<'_>) -> Result<Box<dyn FormatDemuxer>> {
        Ok(Box::new(AviDemuxer::open(ctx)?))
    }
}

/// Every byte is a letter, a digit or `_`.
pub fn valid_fourcc(tag: FourCC) -> bool {
    tag.0.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'_')
}

/// `NNwb`, `NNdc`, `NNdb` or `NNtx`.
pub fn valid_stream_id(tag: FourCC) -> bool {
    let [a, b, c, d] = tag.0;
    a.is_ascii_digit()
        && b.is_ascii_digit()
        && matches!(&[c, d], b"wb" | b"dc" | b"db" | b"tx")
}

/// Picks a record length when the index and the record header disagree.
/// Zero means the record is unusable.
pub fn choose_chunk_len(idx_len: u32, raw_len: u32) -> u32 {
    if idx_len == 0 {
        return if raw_len <= 0x80000 { raw_len } else { 0 };
    }
    if raw_len == 0 {
        return if idx_len <= 0x10_0000 { idx_len } else { 0 };
    }
    idx_len.min(raw_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Source;

    #[test]
    fn test_probe() {
        let mut src = Source::from_bytes(b"RIFF\x10\x00\x00\x00AVI LIST".to_vec());
        assert_eq!(AviDriver.probe(&mut src, 2048).unwrap(), Probe::Definite);
        let mut wav = Source::from_bytes(b"RIFF\x10\x00\x00\x00WAVEfmt ".to_vec());
        assert_eq!(AviDriver.probe(&mut wav, 2048).unwrap(), Probe::No);
        let mut short = Source::from_bytes(b"RIFF".to_vec());
        assert_eq!(AviDriver.probe(&mut short, 2048).unwrap(), Probe::No);
    }

    #[test]
    fn test_stream_ids() {
        assert!(valid_stream_id(FourCC::new(b"00dc")));
        assert!(valid_stream_id(FourCC::new(b"12wb")));
        assert!(!valid_stream_id(FourCC::new(b"ix00")));
        assert!(!valid_stream_id(FourCC::new(b"00pc")));
        assert!(valid_fourcc(FourCC::new(b"JUNK")));
        assert!(!valid_fourcc(FourCC::new(b"AVI ")));
    }

    #[test]
    fn test_choose_chunk_len() {
        assert_eq!(choose_chunk_len(0, 100), 100);
        assert_eq!(choose_chunk_len(0, 0x90000), 0);
        assert_eq!(choose_chunk_len(200, 0), 200);
        assert_eq!(choose_chunk_len(0x20_0000, 0), 0);
        assert_eq!(choose_chunk_len(300, 120), 120);
    }
}
