//! ASF top-level and header objects.

use crate::format::avi::header::{BitmapInfo, WaveFormat};
use crate::error::{DemuxError, Result};
use crate::io::{ByteSource, ByteSourceExt};
use bytes::{Buf, Bytes};
use log::{debug, info, warn};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

pub const HEADER_OBJECT: Guid = Guid([
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
]);
pub const DATA_OBJECT: Guid = Guid([
    0x36, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
]);
pub const SIMPLE_INDEX_OBJECT: Guid = Guid([
    0x90, 0x08, 0x00, 0x33, 0xB1, 0xE5, 0xCF, 0x11, 0x89, 0xF4, 0x00, 0xA0, 0xC9, 0x03, 0x49, 0xCB,
]);
pub const FILE_PROPERTIES: Guid = Guid([
    0xA1, 0xDC, 0xAB, 0x8C, 0x47, 0xA9, 0xCF, 0x11, 0x8E, 0xE4, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65,
]);
pub const STREAM_PROPERTIES: Guid = Guid([
    0x91, 0x07, 0xDC, 0xB7, 0xB7, 0xA9, 0xCF, 0x11, 0x8E, 0xE6, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65,
]);
pub const CONTENT_DESCRIPTION: Guid = Guid([
    0x33, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
]);
pub const AUDIO_MEDIA: Guid = Guid([
    0x40, 0x9E, 0x69, 0xF8, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B,
]);
pub const VIDEO_MEDIA: Guid = Guid([
    0xC0, 0xEF, 0x19, 0xBC, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B,
]);
pub const AUDIO_SPREAD: Guid = Guid([
    0x50, 0xCD, 0xC3, 0xBF, 0x8F, 0x61, 0xCF, 0x11, 0x8B, 0xB2, 0x00, 0xAA, 0x00, 0xB4, 0xE2, 0x20,
]);

/// GUID plus 64-bit size.
const OBJECT_HEADER: u64 = 24;
/// Header object fields after the object header.
const HEADER_OBJECT_FIELDS: u64 = 6;
/// Data object fields after the object header.
const DATA_OBJECT_FIELDS: u64 = 26;
const MAX_HEADER_SIZE: u64 = 1024 * 1024;

fn get_guid(buf: &mut &[u8]) -> Guid {
    let mut g = [0u8; 16];
    buf.copy_to_slice(&mut g);
    Guid(g)
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(DemuxError::HeaderMalformed(format!("{} truncated", what)));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileProperties {
    pub data_packets: u64,
    /// 100 ns units, preroll included.
    pub play_duration: u64,
    pub send_duration: u64,
    /// Milliseconds.
    pub preroll: u64,
    pub flags: u32,
    pub min_packet_size: u32,
    pub max_packet_size: u32,
    pub max_bitrate: u32,
}

impl FileProperties {
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        need(data, 80, "file properties")?;
        data.advance(16 + 8 + 8);
        Ok(Self {
            data_packets: data.get_u64_le(),
            play_duration: data.get_u64_le(),
            send_duration: data.get_u64_le(),
            preroll: data.get_u64_le(),
            flags: data.get_u32_le(),
            min_packet_size: data.get_u32_le(),
            max_packet_size: data.get_u32_le(),
            max_bitrate: data.get_u32_le(),
        })
    }

    /// Presentation length in seconds.
    pub fn duration(&self) -> f64 {
        let preroll = self.preroll.saturating_mul(10_000);
        self.play_duration.saturating_sub(preroll) as f64 / 10_000_000.0
    }
}

/// Spread-spectrum audio interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scramble {
    /// Rows.
    pub span: u8,
    /// Columns.
    pub width: u16,
    /// Bytes per cell.
    pub block: u16,
}

impl Scramble {
    fn decode(mut data: &[u8]) -> Option<Self> {
        if data.remaining() < 5 {
            return None;
        }
        let span = data.get_u8();
        let virtual_packet = data.get_u16_le();
        let virtual_chunk = data.get_u16_le();
        if span <= 1 || virtual_chunk == 0 || virtual_packet / virtual_chunk <= 1 {
            return None;
        }
        Some(Self {
            span,
            width: virtual_packet / virtual_chunk,
            block: virtual_chunk,
        })
    }

    /// Undoes the interleave over whole `span x width x block` groups; a
    /// trailing partial group is left in place.
    pub fn descramble(&self, data: &[u8]) -> Vec<u8> {
        let (h, w, b) = (self.span as usize, self.width as usize, self.block as usize);
        let group = h * w * b;
        let mut out = Vec::with_capacity(data.len());
        let mut groups = data.chunks_exact(group);
        for src in groups.by_ref() {
            for x in 0..w {
                for y in 0..h {
                    let at = (y * w + x) * b;
                    out.extend_from_slice(&src[at..at + b]);
                }
            }
        }
        out.extend_from_slice(groups.remainder());
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamType {
    Audio(WaveFormat),
    Video {
        width: u32,
        height: u32,
        info: BitmapInfo,
    },
    Other(Guid),
}

#[derive(Debug, Clone)]
pub struct StreamProperties {
    pub number: u32,
    pub stream_type: StreamType,
    pub extra: Bytes,
    pub scramble: Option<Scramble>,
}

impl StreamProperties {
    pub fn decode(data: &Bytes) -> Result<Self> {
        let mut buf: &[u8] = data;
        need(buf, 54, "stream properties")?;
        let type_guid = get_guid(&mut buf);
        let concealment = get_guid(&mut buf);
        let _time_offset = buf.get_u64_le();
        let type_len = buf.get_u32_le() as usize;
        let ecc_len = buf.get_u32_le() as usize;
        let number = (buf.get_u16_le() & 0x7f) as u32;
        let _reserved = buf.get_u32_le();
        need(buf, type_len + ecc_len, "stream type data")?;

        let type_start = 54;
        let type_data = data.slice(type_start..type_start + type_len);
        let ecc_data = data.slice(type_start + type_len..type_start + type_len + ecc_len);

        let mut extra = Bytes::new();
        let stream_type = if type_guid == AUDIO_MEDIA {
            let wf = WaveFormat::decode(&type_data)?;
            if type_data.len() > 18 {
                let end = (18 + wf.cb_size as usize).min(type_data.len());
                extra = type_data.slice(18..end);
            }
            StreamType::Audio(wf)
        } else if type_guid == VIDEO_MEDIA {
            let mut t: &[u8] = &type_data;
            need(t, 11, "video stream data")?;
            let width = t.get_u32_le();
            let height = t.get_u32_le();
            let _flags = t.get_u8();
            let _format_len = t.get_u16_le();
            let info = BitmapInfo::decode(t)?;
            if type_data.len() > 11 + BitmapInfo::LEN {
                extra = type_data.slice(11 + BitmapInfo::LEN..);
            }
            StreamType::Video {
                width,
                height,
                info,
            }
        } else {
            StreamType::Other(type_guid)
        };

        let scramble = if concealment == AUDIO_SPREAD {
            Scramble::decode(&ecc_data)
        } else {
            None
        };
        Ok(Self {
            number,
            stream_type,
            extra,
            scramble,
        })
    }
}

/// Packet locator every `interval` of presentation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimpleIndex {
    /// 100 ns units.
    pub interval: u64,
    /// (packet number, packet count)
    pub entries: Vec<(u32, u16)>,
}

impl SimpleIndex {
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.remaining() < 32 {
            return Err(DemuxError::IndexRejected("simple index too short".into()));
        }
        data.advance(16);
        let interval = data.get_u64_le();
        let _max_packets = data.get_u32_le();
        let count = data.get_u32_le() as usize;
        if interval == 0 || data.remaining() < count * 6 {
            return Err(DemuxError::IndexRejected(format!(
                "simple index of {} entries every {}",
                count, interval
            )));
        }
        let entries = (0..count)
            .map(|_| (data.get_u32_le(), data.get_u16_le()))
            .collect();
        Ok(Self { interval, entries })
    }

    /// Packet to start from for presentation time `ms` (preroll included).
    pub fn packet_for(&self, ms: f64) -> Option<u32> {
        let last = self.entries.len().checked_sub(1)?;
        let i = ((ms.max(0.0) * 10_000.0) / self.interval as f64) as usize;
        self.entries.get(i.min(last)).map(|&(packet, _)| packet)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AsfHeader {
    pub file: FileProperties,
    pub streams: Vec<StreamProperties>,
    pub title: Option<String>,
    pub data_start: u64,
    pub data_end: u64,
    pub total_packets: u64,
}

fn utf16_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

fn decode_title(mut data: &[u8]) -> Option<String> {
    if data.remaining() < 10 {
        return None;
    }
    let title_len = data.get_u16_le() as usize;
    data.advance(8);
    let title = data.get(..title_len)?;
    Some(utf16_string(title)).filter(|t| !t.is_empty())
}

/// Reads the header object and the data object header. The source is left
/// at the first data packet.
pub fn read_header(src: &mut dyn ByteSource) -> Result<AsfHeader> {
    let mut guid = [0u8; 16];
    src.read_exact_into(&mut guid)?;
    if Guid(guid) != HEADER_OBJECT {
        return Err(DemuxError::HeaderMalformed("not an ASF header object".into()));
    }
    let size = src.read_u64_le()?;
    let objects = src.read_u32_le()?;
    src.skip(2)?;
    let body_len = size
        .checked_sub(OBJECT_HEADER + HEADER_OBJECT_FIELDS)
        .filter(|&l| l <= MAX_HEADER_SIZE)
        .ok_or_else(|| DemuxError::HeaderMalformed(format!("header object of {} bytes", size)))?;
    let body = src.read_bytes(body_len as usize)?;

    let mut header = AsfHeader::default();
    let mut have_file = false;
    let mut at = 0usize;
    for _ in 0..objects {
        if at + OBJECT_HEADER as usize > body.len() {
            break;
        }
        let mut obj: &[u8] = &body[at..];
        let id = get_guid(&mut obj);
        let obj_size = obj.get_u64_le() as usize;
        if obj_size < OBJECT_HEADER as usize || at + obj_size > body.len() {
            return Err(DemuxError::HeaderMalformed(format!(
                "object {:?} of {} bytes overruns the header",
                id,
                obj_size
            )));
        }
        let content = body.slice(at + OBJECT_HEADER as usize..at + obj_size);
        match id {
            FILE_PROPERTIES => {
                header.file = FileProperties::decode(&content)?;
                have_file = true;
            }
            STREAM_PROPERTIES => match StreamProperties::decode(&content) {
                Ok(stream) => header.streams.push(stream),
                Err(e) => warn!("asf: stream properties skipped: {}", e),
            },
            CONTENT_DESCRIPTION => header.title = decode_title(&content),
            other => debug!("asf: header object {:?} skipped", other),
        }
        at += obj_size;
    }
    if !have_file {
        return Err(DemuxError::HeaderMalformed("missing file properties".into()));
    }
    if header.file.max_packet_size == 0 {
        return Err(DemuxError::HeaderMalformed("zero packet size".into()));
    }

    let data_pos = src.tell();
    src.read_exact_into(&mut guid)?;
    if Guid(guid) != DATA_OBJECT {
        return Err(DemuxError::HeaderMalformed("no data object after the header".into()));
    }
    let data_size = src.read_u64_le()?;
    src.skip(16)?;
    header.total_packets = src.read_u64_le()?;
    src.skip(2)?;
    header.data_start = data_pos + OBJECT_HEADER + DATA_OBJECT_FIELDS;
    header.data_end = if data_size > OBJECT_HEADER + DATA_OBJECT_FIELDS {
        data_pos + data_size
    } else {
        u64::MAX
    };
    if let Some(len) = src.len() {
        header.data_end = header.data_end.min(len);
    }
    info!(
        "asf: {} streams, packet size {}, data {}..{}",
        header.streams.len(),
        header.file.max_packet_size,
        header.data_start,
        header.data_end
    );
    Ok(header)
}

/// Looks for a simple index object among the top-level objects after the
/// data object. The source position is not restored.
pub fn find_simple_index(src: &mut dyn ByteSource, from: u64) -> Result<Option<SimpleIndex>> {
    let mut pos = from;
    let end = src.len().unwrap_or(0);
    while pos + OBJECT_HEADER <= end {
        src.seek(pos)?;
        let mut guid = [0u8; 16];
        src.read_exact_into(&mut guid)?;
        let size = src.read_u64_le()?;
        if size < OBJECT_HEADER {
            break;
        }
        if Guid(guid) == SIMPLE_INDEX_OBJECT {
            let body = src.read_bytes((size - OBJECT_HEADER) as usize)?;
            return SimpleIndex::decode(&body).map(Some);
        }
        pos += size;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_descramble_reorders_full_groups() {
        let s = Scramble {
            span: 2,
            width: 3,
            block: 1,
        };
        // rows written one after the other, read back column by column
        let scrambled = [0, 2, 4, 1, 3, 5, 9];
        assert_eq!(s.descramble(&scrambled), vec![0, 1, 2, 3, 4, 5, 9]);
    }

    #[test]
    fn test_scramble_decode() {
        assert_eq!(
            Scramble::decode(&[4, 0x00, 0x02, 0x80, 0x00]),
            Some(Scramble {
                span: 4,
                width: 4,
                block: 0x80
            })
        );
        assert_eq!(Scramble::decode(&[1, 0x00, 0x02, 0x80, 0x00]), None);
    }

    #[test]
    fn test_simple_index_lookup() {
        let index = SimpleIndex {
            interval: 10_000_000,
            entries: vec![(0, 1), (4, 1), (9, 1)],
        };
        assert_eq!(index.packet_for(0.0), Some(0));
        assert_eq!(index.packet_for(1500.0), Some(4));
        assert_eq!(index.packet_for(99_000.0), Some(9));
        assert_eq!(SimpleIndex::default().packet_for(0.0), None);
    }
}
