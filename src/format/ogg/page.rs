//! Page framing: capture pattern, header fields, lacing and checksum.

use crate::error::Result;
use crate::io::{ByteSource, ByteSourceExt};
use crate::utils::OggCrc;
use bytes::{Buf, Bytes};
use log::{debug, trace};

pub const CAPTURE: &[u8; 4] = b"OggS";
pub const HEADER_LEN: usize = 27;
const CRC_FIELD: std::ops::Range<usize> = 22..26;
const SCAN_CHUNK: usize = 4096;

pub const FLAG_CONTINUED: u8 = 0x01;
pub const FLAG_BOS: u8 = 0x02;
pub const FLAG_EOS: u8 = 0x04;

#[derive(Debug, Clone)]
pub struct Page {
    /// Offset of the capture pattern.
    pub pos: u64,
    pub flags: u8,
    /// -1 when no packet ends on this page.
    pub granule: i64,
    pub serial: u32,
    pub sequence: u32,
    pub lacing: Vec<u8>,
    pub body: Bytes,
}

/// Part of a packet carried by one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub data: Bytes,
    /// The packet ends inside this page.
    pub complete: bool,
}

impl Page {
    pub fn is_continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.flags & FLAG_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.flags & FLAG_EOS != 0
    }

    pub fn total_len(&self) -> u64 {
        (HEADER_LEN + self.lacing.len() + self.body.len()) as u64
    }

    /// Offset just past this page.
    pub fn end(&self) -> u64 {
        self.pos + self.total_len()
    }

    /// Packet pieces in page order. A lacing value below 255 ends a packet;
    /// a trailing run of 255s leaves the last piece open.
    pub fn pieces(&self) -> Vec<Piece> {
        let mut out = Vec::new();
        let mut start = 0usize;
        let mut len = 0usize;
        for &lace in &self.lacing {
            len += lace as usize;
            if lace < 255 {
                out.push(Piece {
                    data: self.body.slice(start..start + len),
                    complete: true,
                });
                start += len;
                len = 0;
            }
        }
        if len > 0 || self.lacing.last() == Some(&255) {
            out.push(Piece {
                data: self.body.slice(start..start + len),
                complete: false,
            });
        }
        out
    }

    pub fn completed_packets(&self) -> usize {
        self.lacing.iter().filter(|&&l| l < 255).count()
    }
}

/// Outcome of decoding the page under the read position.
#[derive(Debug)]
pub enum PageRead {
    Page(Page),
    /// Capture pattern present but the page is damaged; one byte skipped.
    Corrupt,
    /// Not enough data left for a whole page.
    End,
}

/// Reads checksummed pages and resynchronizes after damage.
pub struct PageReader {
    crc: OggCrc,
    corrupt: u64,
}

impl Default for PageReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PageReader {
    pub fn new() -> Self {
        Self {
            crc: OggCrc::new(),
            corrupt: 0,
        }
    }

    /// Damaged pages seen since the last call.
    pub fn take_corrupt(&mut self) -> u64 {
        std::mem::take(&mut self.corrupt)
    }

    fn checksum(&self, raw: &[u8]) -> u32 {
        let crc = self.crc.update(0, &raw[..CRC_FIELD.start]);
        let crc = self.crc.update(crc, &[0; 4]);
        self.crc.update(crc, &raw[CRC_FIELD.end..])
    }

    /// Decodes the page at the current position without reading past it on
    /// failure.
    pub fn read_at(&self, src: &mut dyn ByteSource) -> Result<PageRead> {
        let pos = src.tell();
        let head = src.peek(HEADER_LEN)?;
        if head.len() < HEADER_LEN {
            return Ok(PageRead::End);
        }
        if &head[..4] != CAPTURE || head[4] != 0 {
            src.skip(1)?;
            return Ok(PageRead::Corrupt);
        }
        let segments = head[26] as usize;
        let lacing_end = HEADER_LEN + segments;
        let lacing = src.peek(lacing_end)?;
        if lacing.len() < lacing_end {
            return Ok(PageRead::End);
        }
        let body_len: usize = lacing[HEADER_LEN..].iter().map(|&l| l as usize).sum();
        let total = lacing_end + body_len;

        let raw = src.peek(total)?;
        if raw.len() < total {
            debug!("ogg: page at {} cut short ({} of {} bytes)", pos, raw.len(), total);
            return Ok(PageRead::End);
        }
        let mut fields: &[u8] = &raw[5..];
        let flags = fields.get_u8();
        let granule = fields.get_i64_le();
        let serial = fields.get_u32_le();
        let sequence = fields.get_u32_le();
        let stored = fields.get_u32_le();
        let computed = self.checksum(raw);
        if stored != computed {
            debug!(
                "ogg: checksum mismatch at {} (stored {:08x}, computed {:08x})",
                pos, stored, computed
            );
            src.skip(1)?;
            return Ok(PageRead::Corrupt);
        }
        let lacing = raw[HEADER_LEN..lacing_end].to_vec();

        src.skip(lacing_end as u64)?;
        let body = src.read_bytes(body_len)?;
        trace!(
            "ogg: page {} of serial {:08x} at {}, granule {}, {} bytes",
            sequence,
            serial,
            pos,
            granule,
            body_len
        );
        Ok(PageRead::Page(Page {
            pos,
            flags,
            granule,
            serial,
            sequence,
            lacing,
            body,
        }))
    }

    /// Next intact page at or after the current position that starts before
    /// `limit`.
    pub fn next_page(&mut self, src: &mut dyn ByteSource, limit: u64) -> Result<Option<Page>> {
        loop {
            if !sync(src, limit)? {
                return Ok(None);
            }
            match self.read_at(src)? {
                PageRead::Page(page) => return Ok(Some(page)),
                PageRead::Corrupt => self.corrupt += 1,
                PageRead::End => return Ok(None),
            }
        }
    }
}

/// Advances to the next capture pattern before `limit`. Returns `false` when
/// none is left.
pub fn sync(src: &mut dyn ByteSource, limit: u64) -> Result<bool> {
    loop {
        let pos = src.tell();
        if pos >= limit {
            return Ok(false);
        }
        let window = src.peek(SCAN_CHUNK)?;
        if window.len() < CAPTURE.len() {
            return Ok(false);
        }
        match window.windows(CAPTURE.len()).position(|w| w == CAPTURE) {
            Some(0) => return Ok(true),
            Some(at) => {
                trace!("ogg: skipped {} bytes to a capture pattern", at);
                src.skip(at as u64)?;
            }
            None => {
                let step = (window.len() - (CAPTURE.len() - 1)) as u64;
                src.skip(step)?;
            }
        }
    }
}

/// Serializes a page with a correct checksum. An open last packet is
/// zero-padded to a whole segment.
#[cfg(test)]
pub(crate) fn write_page(
    out: &mut Vec<u8>,
    flags: u8,
    granule: i64,
    serial: u32,
    sequence: u32,
    packets: &[&[u8]],
    last_open: bool,
) {
    let mut lacing = Vec::new();
    let mut body = Vec::new();
    for (i, packet) in packets.iter().enumerate() {
        let mut left = packet.len();
        while left >= 255 {
            lacing.push(255);
            left -= 255;
        }
        body.extend_from_slice(packet);
        let open = last_open && i + 1 == packets.len();
        if !open {
            lacing.push(left as u8);
        } else if left > 0 {
            lacing.push(255);
            body.resize(body.len() + 255 - left, 0);
        }
    }
    let start = out.len();
    out.extend_from_slice(CAPTURE);
    out.push(0);
    out.push(flags);
    out.extend_from_slice(&granule.to_le_bytes());
    out.extend_from_slice(&serial.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.push(lacing.len() as u8);
    out.extend_from_slice(&lacing);
    out.extend_from_slice(&body);
    let crc = OggCrc::new().calculate(&out[start..]);
    out[start + CRC_FIELD.start..start + CRC_FIELD.end].copy_from_slice(&crc.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Source;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_and_split_pieces() {
        let big = vec![7u8; 300];
        let mut data = Vec::new();
        write_page(&mut data, FLAG_BOS, 40, 9, 0, &[b"abc", &big, b""], false);
        let mut src = Source::from_bytes(data.clone());
        let page = match PageReader::new().read_at(&mut src).unwrap() {
            PageRead::Page(p) => p,
            other => panic!("unexpected {:?}", other),
        };
        assert!(page.is_bos());
        assert_eq!(page.granule, 40);
        assert_eq!(page.serial, 9);
        assert_eq!(page.end(), data.len() as u64);
        let pieces = page.pieces();
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].data.as_ref(), b"abc");
        assert_eq!(pieces[1].data.len(), 300);
        assert!(pieces.iter().all(|p| p.complete));
        assert_eq!(page.completed_packets(), 3);
    }

    #[test]
    fn test_open_piece() {
        let mut data = Vec::new();
        write_page(&mut data, 0, -1, 1, 3, &[&[1u8; 255]], true);
        let mut src = Source::from_bytes(data);
        let page = PageReader::new().next_page(&mut src, u64::MAX).unwrap().unwrap();
        let pieces = page.pieces();
        assert_eq!(pieces.len(), 1);
        assert!(!pieces[0].complete);
        assert_eq!(page.completed_packets(), 0);
    }

    #[test]
    fn test_crc_damage_resyncs_to_next_page() {
        let mut data = b"garbage".to_vec();
        let first = data.len();
        write_page(&mut data, 0, 10, 1, 1, &[b"hello"], false);
        data[first + HEADER_LEN + 2] ^= 0xff;
        let second = data.len();
        write_page(&mut data, 0, 20, 1, 2, &[b"world"], false);

        let mut reader = PageReader::new();
        let mut src = Source::from_bytes(data);
        let page = reader.next_page(&mut src, u64::MAX).unwrap().unwrap();
        assert_eq!(page.pos, second as u64);
        assert_eq!(page.granule, 20);
        assert_eq!(reader.take_corrupt(), 1);
        assert!(reader.next_page(&mut src, u64::MAX).unwrap().is_none());
    }
}
