//! RIFF/AVI header structures, decoded field by field.

use crate::av::FourCC;
use crate::error::{DemuxError, Result};
use crate::io::{ByteSource, ByteSourceExt};
use bytes::{Buf, Bytes};
use log::{debug, info, warn};

pub const RIFF: FourCC = FourCC::new(b"RIFF");
pub const LIST: FourCC = FourCC::new(b"LIST");
pub const JUNK: FourCC = FourCC::new(b"JUNK");
const HDRL: FourCC = FourCC::new(b"hdrl");
const STRL: FourCC = FourCC::new(b"strl");
const ODML: FourCC = FourCC::new(b"odml");
const MOVI: FourCC = FourCC::new(b"movi");
const AVIH: FourCC = FourCC::new(b"avih");
const STRH: FourCC = FourCC::new(b"strh");
const STRF: FourCC = FourCC::new(b"strf");
const STRN: FourCC = FourCC::new(b"strn");
const INDX: FourCC = FourCC::new(b"indx");
const DMLH: FourCC = FourCC::new(b"dmlh");
const IDX1: FourCC = FourCC::new(b"idx1");

pub const VIDS: FourCC = FourCC::new(b"vids");
pub const AUDS: FourCC = FourCC::new(b"auds");
pub const TXTS: FourCC = FourCC::new(b"txts");
pub const IAVS: FourCC = FourCC::new(b"iavs");

/// Header chunks larger than this are not loaded into memory.
const MAX_HEADER_CHUNK: u32 = 16 * 1024 * 1024;

fn need(data: &[u8], len: usize, what: &str) -> Result<()> {
    if data.len() < len {
        return Err(DemuxError::HeaderMalformed(format!(
            "{} is {} bytes, need {}",
            what,
            data.len(),
            len
        )));
    }
    Ok(())
}

fn get_fourcc(buf: &mut &[u8]) -> FourCC {
    let mut tag = [0u8; 4];
    buf.copy_to_slice(&mut tag);
    FourCC(tag)
}

/// `avih`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MainHeader {
    pub us_per_frame: u32,
    pub max_bytes_per_sec: u32,
    pub padding_granularity: u32,
    pub flags: u32,
    pub total_frames: u32,
    pub initial_frames: u32,
    pub streams: u32,
    pub suggested_buffer_size: u32,
    pub width: u32,
    pub height: u32,
}

impl MainHeader {
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        need(data, 40, "avih")?;
        Ok(Self {
            us_per_frame: data.get_u32_le(),
            max_bytes_per_sec: data.get_u32_le(),
            padding_granularity: data.get_u32_le(),
            flags: data.get_u32_le(),
            total_frames: data.get_u32_le(),
            initial_frames: data.get_u32_le(),
            streams: data.get_u32_le(),
            suggested_buffer_size: data.get_u32_le(),
            width: data.get_u32_le(),
            height: data.get_u32_le(),
        })
    }
}

/// `strh`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamHeader {
    pub fcc_type: FourCC,
    pub fcc_handler: FourCC,
    pub flags: u32,
    pub priority: u16,
    pub language: u16,
    pub initial_frames: u32,
    pub scale: u32,
    pub rate: u32,
    pub start: u32,
    pub length: u32,
    pub suggested_buffer_size: u32,
    pub quality: u32,
    pub sample_size: u32,
}

impl StreamHeader {
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        need(data, 48, "strh")?;
        Ok(Self {
            fcc_type: get_fourcc(&mut data),
            fcc_handler: get_fourcc(&mut data),
            flags: data.get_u32_le(),
            priority: data.get_u16_le(),
            language: data.get_u16_le(),
            initial_frames: data.get_u32_le(),
            scale: data.get_u32_le(),
            rate: data.get_u32_le(),
            start: data.get_u32_le(),
            length: data.get_u32_le(),
            suggested_buffer_size: data.get_u32_le(),
            quality: data.get_u32_le(),
            sample_size: data.get_u32_le(),
        })
    }

    pub fn fps(&self) -> f64 {
        if self.scale == 0 {
            return 0.0;
        }
        self.rate as f64 / self.scale as f64
    }
}

/// `BITMAPINFOHEADER`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BitmapInfo {
    pub size: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: FourCC,
    pub size_image: u32,
}

impl BitmapInfo {
    pub const LEN: usize = 40;

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        need(data, Self::LEN, "BITMAPINFOHEADER")?;
        let info = Self {
            size: data.get_u32_le(),
            width: data.get_i32_le(),
            height: data.get_i32_le(),
            planes: data.get_u16_le(),
            bit_count: data.get_u16_le(),
            compression: get_fourcc(&mut data),
            size_image: data.get_u32_le(),
        };
        Ok(info)
    }
}

/// `WAVEFORMATEX`; `cb_size` is zero for the 16-byte `WAVEFORMAT`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub cb_size: u16,
}

impl WaveFormat {
    pub const PCM: u16 = 0x0001;

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        need(data, 16, "WAVEFORMATEX")?;
        let mut wf = Self {
            format_tag: data.get_u16_le(),
            channels: data.get_u16_le(),
            samples_per_sec: data.get_u32_le(),
            avg_bytes_per_sec: data.get_u32_le(),
            block_align: data.get_u16_le(),
            bits_per_sample: data.get_u16_le(),
            cb_size: 0,
        };
        if data.remaining() >= 2 {
            wf.cb_size = data.get_u16_le();
        }
        Ok(wf)
    }
}

/// One `indx` entry: where a standard index chunk lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperIndexEntry {
    pub offset: u64,
    pub size: u32,
    pub duration: u32,
}

pub const AVI_INDEX_OF_INDEXES: u8 = 0x00;
pub const AVI_INDEX_OF_CHUNKS: u8 = 0x01;

/// `indx` (OpenDML super index).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuperIndex {
    pub longs_per_entry: u16,
    pub sub_type: u8,
    pub index_type: u8,
    pub chunk_id: FourCC,
    pub entries: Vec<SuperIndexEntry>,
}

impl SuperIndex {
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        need(data, 24, "indx")?;
        let longs_per_entry = data.get_u16_le();
        let sub_type = data.get_u8();
        let index_type = data.get_u8();
        let in_use = data.get_u32_le() as usize;
        let chunk_id = get_fourcc(&mut data);
        data.advance(12);

        if index_type != AVI_INDEX_OF_INDEXES || longs_per_entry != 4 {
            return Err(DemuxError::IndexRejected(format!(
                "unsupported super index type {} / {} longs",
                index_type, longs_per_entry
            )));
        }
        let available = data.remaining() / 16;
        if in_use > available {
            warn!("indx claims {} entries, only {} present", in_use, available);
        }
        let entries = (0..in_use.min(available))
            .map(|_| SuperIndexEntry {
                offset: data.get_u64_le(),
                size: data.get_u32_le(),
                duration: data.get_u32_le(),
            })
            .collect();
        Ok(Self {
            longs_per_entry,
            sub_type,
            index_type,
            chunk_id,
            entries,
        })
    }
}

/// One legacy `idx1` record, offset still container-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Idx1Entry {
    pub ckid: FourCC,
    pub flags: u32,
    pub offset: u32,
    pub len: u32,
}

fn decode_idx1(mut data: &[u8]) -> Vec<Idx1Entry> {
    let mut entries = Vec::with_capacity(data.len() / 16);
    while data.remaining() >= 16 {
        entries.push(Idx1Entry {
            ckid: get_fourcc(&mut data),
            flags: data.get_u32_le(),
            offset: data.get_u32_le(),
            len: data.get_u32_le(),
        });
    }
    entries
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFormat {
    Video(BitmapInfo),
    Audio(WaveFormat),
    Other,
}

/// One `strl` list.
#[derive(Debug, Clone)]
pub struct StreamList {
    pub number: u32,
    pub header: StreamHeader,
    pub format: StreamFormat,
    /// Codec-init bytes following the format structure.
    pub extra: Bytes,
    pub super_index: Option<SuperIndex>,
    pub name: Option<String>,
}

/// Everything read before the first media record.
#[derive(Debug, Clone, Default)]
pub struct AviHeader {
    pub main: MainHeader,
    pub streams: Vec<StreamList>,
    /// First byte after the `movi` list type.
    pub movi_start: u64,
    pub movi_end: u64,
    pub idx1: Vec<Idx1Entry>,
    /// OpenDML total frame count from `dmlh`.
    pub odml_frames: Option<u32>,
    pub is_odml: bool,
}

impl AviHeader {
    pub fn stream(&self, number: u32) -> Option<&StreamList> {
        self.streams.iter().find(|s| s.number == number)
    }
}

fn read_chunk_body(src: &mut dyn ByteSource, size: u32, what: FourCC) -> Result<Bytes> {
    if size > MAX_HEADER_CHUNK {
        return Err(DemuxError::HeaderMalformed(format!(
            "{} chunk of {} bytes",
            what, size
        )));
    }
    let body = src.read_bytes(size as usize)?;
    if size & 1 == 1 {
        src.skip(1)?;
    }
    Ok(body)
}

fn apply_strf(stream: &mut StreamList, body: &Bytes) -> Result<()> {
    match stream.header.fcc_type {
        VIDS | IAVS => {
            let info = BitmapInfo::decode(body)?;
            if body.len() > BitmapInfo::LEN {
                stream.extra = body.slice(BitmapInfo::LEN..);
            }
            stream.format = StreamFormat::Video(info);
        }
        AUDS => {
            let wf = WaveFormat::decode(body)?;
            if body.len() > 18 {
                let end = (18 + wf.cb_size as usize).min(body.len());
                stream.extra = body.slice(18..end);
            }
            stream.format = StreamFormat::Audio(wf);
        }
        _ => {}
    }
    Ok(())
}

/// Walks the RIFF structure up to the end of the first data list, reading
/// `idx1` when it follows. Later `RIFF AVIX` data lists extend the data
/// region.
pub fn read_header(src: &mut dyn ByteSource) -> Result<AviHeader> {
    let riff = src.read_fourcc()?;
    let _riff_size = src.read_u32_le()?;
    let form = src.read_fourcc()?;
    debug!("avi: {} form {}", riff, form);

    let file_len = src.len();
    let mut header = AviHeader::default();
    let mut have_avih = false;
    let mut movi_seen = false;

    loop {
        let chunk_pos = src.tell();
        let (id, size) = match (src.read_fourcc(), src.read_u32_le()) {
            (Ok(id), Ok(size)) => (id, size),
            _ => break,
        };

        match id {
            LIST | RIFF => {
                let Ok(list_type) = src.read_fourcc() else {
                    break;
                };
                match list_type {
                    HDRL | STRL | ODML => {}
                    MOVI => {
                        let start = chunk_pos + 12;
                        let mut end = chunk_pos + 8 + size as u64;
                        if size < 4 || file_len.map(|l| end > l).unwrap_or(false) {
                            end = file_len.unwrap_or(u64::MAX);
                        }
                        if !movi_seen {
                            header.movi_start = start;
                            movi_seen = true;
                        }
                        header.movi_end = header.movi_end.max(end);
                        if !src.is_seekable() || file_len.is_none() {
                            break;
                        }
                        src.seek(end + (end & 1))?;
                    }
                    _ if id == RIFF => {
                        debug!("avi: additional RIFF {}", list_type);
                        header.is_odml = true;
                    }
                    _ => {
                        src.skip((size.saturating_sub(4) as u64 + 1) & !1)?;
                    }
                }
            }
            AVIH => {
                let body = read_chunk_body(src, size, id)?;
                header.main = MainHeader::decode(&body)?;
                have_avih = true;
            }
            STRH => {
                let body = read_chunk_body(src, size, id)?;
                let strh = StreamHeader::decode(&body)?;
                let number = header.streams.len() as u32;
                header.streams.push(StreamList {
                    number,
                    header: strh,
                    format: StreamFormat::Other,
                    extra: Bytes::new(),
                    super_index: None,
                    name: None,
                });
            }
            STRF | INDX | STRN => {
                let body = read_chunk_body(src, size, id)?;
                let Some(stream) = header.streams.last_mut() else {
                    warn!("avi: {} before any strh", id);
                    continue;
                };
                match id {
                    STRF => apply_strf(stream, &body)?,
                    INDX => match SuperIndex::decode(&body) {
                        Ok(indx) => {
                            header.is_odml = true;
                            stream.super_index = Some(indx);
                        }
                        Err(e) => warn!("avi: stream {} indx ignored: {}", stream.number, e),
                    },
                    _ => {
                        let name = String::from_utf8_lossy(&body);
                        stream.name = Some(name.trim_end_matches('\0').to_string());
                    }
                }
            }
            DMLH => {
                let body = read_chunk_body(src, size, id)?;
                if body.len() >= 4 {
                    header.odml_frames = Some((&body[..]).get_u32_le());
                }
                header.is_odml = true;
            }
            IDX1 => {
                match read_chunk_body(src, size, id) {
                    Ok(body) => header.idx1 = decode_idx1(&body),
                    Err(e) => warn!("avi: idx1 unreadable: {}", e),
                }
                info!("avi: idx1 with {} entries", header.idx1.len());
            }
            _ => {
                src.skip((size as u64 + 1) & !1)?;
            }
        }
    }

    if !have_avih {
        return Err(DemuxError::HeaderMalformed("missing avih".into()));
    }
    if !movi_seen {
        return Err(DemuxError::HeaderMalformed("missing movi list".into()));
    }
    if header.streams.is_empty() {
        return Err(DemuxError::HeaderMalformed("no strl lists".into()));
    }
    Ok(header)
}
