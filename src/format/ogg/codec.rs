//! Logical stream identification from the first packet, and the granule
//! position arithmetic of each mapping.

use crate::av::{AudioParams, CodecTag, FourCC, StreamKind, TimeBase, VideoParams};
use bytes::Buf;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OggCodec {
    Vorbis,
    Theora,
    Opus,
    Flac,
    Speex,
    /// OggDS ("new header") video, audio or text.
    Ogm,
}

/// OggDS packet type bits.
const OGM_HEADER: u8 = 0x01;
const OGM_SYNCPOINT: u8 = 0x08;
/// Opus granules always count 48 kHz samples.
const OPUS_RATE: f64 = 48000.0;

/// What the beginning-of-stream packet says about a logical stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub codec: OggCodec,
    pub kind: StreamKind,
    pub tag: CodecTag,
    /// Granule units per second (frames for video, samples for audio).
    pub rate: f64,
    pub time_base: TimeBase,
    /// Header packets at the start of the stream, the first included.
    /// `None` for OggDS, whose header packets are flagged instead.
    pub headers: Option<usize>,
    pub granule_shift: u32,
    /// Theora from 3.2.1 counts granules from one.
    pub granule_offset: i64,
    pub pre_skip: i64,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
    /// Extra codec data carried in the OggDS header.
    pub extra: Vec<u8>,
}

impl Ident {
    fn new(codec: OggCodec, kind: StreamKind, tag: CodecTag, rate: f64, time_base: TimeBase) -> Self {
        Self {
            codec,
            kind,
            tag,
            rate,
            time_base,
            headers: Some(1),
            granule_shift: 0,
            granule_offset: 0,
            pre_skip: 0,
            video: None,
            audio: None,
            extra: Vec::new(),
        }
    }

    /// Frame or sample number named by a granule position.
    pub fn granule_units(&self, granule: i64) -> Option<i64> {
        if granule < 0 {
            return None;
        }
        let units = match self.codec {
            OggCodec::Theora => {
                let key = granule >> self.granule_shift;
                let delta = granule - (key << self.granule_shift);
                key + delta - self.granule_offset
            }
            OggCodec::Opus => granule - self.pre_skip,
            _ => granule,
        };
        Some(units.max(0))
    }

    /// Keyframe number for Theora, the plain unit count otherwise.
    pub fn granule_key(&self, granule: i64) -> Option<i64> {
        if granule < 0 {
            return None;
        }
        match self.codec {
            OggCodec::Theora => Some(((granule >> self.granule_shift) - self.granule_offset).max(0)),
            _ => self.granule_units(granule),
        }
    }

    pub fn units_to_pts(&self, units: i64) -> f64 {
        if self.rate <= 0.0 {
            return 0.0;
        }
        units.max(0) as f64 / self.rate
    }

    pub fn granule_pts(&self, granule: i64) -> Option<f64> {
        self.granule_units(granule).map(|u| self.units_to_pts(u))
    }

    /// Whether a complete data packet starts a decodable unit.
    pub fn is_keyframe(&self, packet: &[u8]) -> bool {
        match (self.codec, self.kind) {
            (OggCodec::Theora, _) => packet.first().map(|b| b & 0xc0 == 0).unwrap_or(false),
            (OggCodec::Ogm, StreamKind::Video) => {
                packet.first().map(|b| b & OGM_SYNCPOINT != 0).unwrap_or(false)
            }
            _ => true,
        }
    }

    /// Whether each packet is one video frame, so earlier packets on a page
    /// can be timed back from the page granule.
    pub fn frame_granules(&self) -> bool {
        self.kind == StreamKind::Video
    }
}

/// Splits an OggDS data packet into its payload. Header packets yield `None`.
pub fn ogm_payload(packet: &[u8]) -> Option<&[u8]> {
    let first = *packet.first()?;
    if first & OGM_HEADER != 0 {
        return None;
    }
    let len_bytes = (((first & 0xc0) >> 6) | ((first & 0x02) << 1)) as usize;
    packet.get(1 + len_bytes..)
}

fn be24(b: &[u8]) -> u32 {
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

fn vorbis(p: &[u8]) -> Option<Ident> {
    if p.len() < 30 {
        return None;
    }
    let mut b = &p[7..];
    let _version = b.get_u32_le();
    let channels = b.get_u8();
    let rate = b.get_u32_le();
    if rate == 0 {
        return None;
    }
    let _max = b.get_i32_le();
    let nominal = b.get_i32_le();
    let mut id = Ident::new(
        OggCodec::Vorbis,
        StreamKind::Audio,
        CodecTag::Named("vorbis"),
        rate as f64,
        TimeBase::new(1, rate),
    );
    id.headers = Some(3);
    id.audio = Some(AudioParams {
        channels: channels as u16,
        sample_rate: rate,
        bits_per_sample: 0,
        block_align: 0,
        avg_bytes_per_sec: (nominal.max(0) / 8) as u32,
    });
    Some(id)
}

fn theora(p: &[u8]) -> Option<Ident> {
    if p.len() < 42 {
        return None;
    }
    let version = (p[7], p[8], p[9]);
    let width = be24(&p[14..17]);
    let height = be24(&p[17..20]);
    let mut b = &p[22..];
    let fps_num = b.get_u32();
    let fps_den = b.get_u32();
    if fps_num == 0 || fps_den == 0 {
        return None;
    }
    let shift = ((u16::from_be_bytes([p[40], p[41]]) >> 5) & 0x1f) as u32;
    let fps = fps_num as f64 / fps_den as f64;
    let mut id = Ident::new(
        OggCodec::Theora,
        StreamKind::Video,
        CodecTag::FourCC(FourCC::new(b"theo")),
        fps,
        TimeBase::new(fps_den, fps_num),
    );
    id.headers = Some(3);
    id.granule_shift = shift;
    id.granule_offset = if version >= (3, 2, 1) { 1 } else { 0 };
    id.video = Some(VideoParams {
        width,
        height,
        fps: Some(fps),
    });
    Some(id)
}

fn opus(p: &[u8]) -> Option<Ident> {
    if p.len() < 19 {
        return None;
    }
    let mut b = &p[8..];
    let _version = b.get_u8();
    let channels = b.get_u8();
    let pre_skip = b.get_u16_le();
    let input_rate = b.get_u32_le();
    let mut id = Ident::new(
        OggCodec::Opus,
        StreamKind::Audio,
        CodecTag::Named("opus"),
        OPUS_RATE,
        TimeBase::new(1, 48000),
    );
    id.headers = Some(2);
    id.pre_skip = pre_skip as i64;
    id.audio = Some(AudioParams {
        channels: channels as u16,
        sample_rate: if input_rate != 0 { input_rate } else { 48000 },
        ..Default::default()
    });
    Some(id)
}

fn flac(p: &[u8]) -> Option<Ident> {
    if p.len() < 51 || &p[9..13] != b"fLaC" {
        return None;
    }
    let extra_headers = u16::from_be_bytes([p[7], p[8]]) as usize;
    let info = &p[17..];
    let rate = (info[10] as u32) << 12 | (info[11] as u32) << 4 | (info[12] as u32) >> 4;
    if rate == 0 {
        return None;
    }
    let channels = ((info[12] >> 1) & 7) as u16 + 1;
    let bits = (((info[12] & 1) << 4) | (info[13] >> 4)) as u16 + 1;
    let mut id = Ident::new(
        OggCodec::Flac,
        StreamKind::Audio,
        CodecTag::Named("flac"),
        rate as f64,
        TimeBase::new(1, rate),
    );
    id.headers = Some(1 + extra_headers);
    id.audio = Some(AudioParams {
        channels,
        sample_rate: rate,
        bits_per_sample: bits,
        ..Default::default()
    });
    Some(id)
}

fn speex(p: &[u8]) -> Option<Ident> {
    if p.len() < 80 {
        return None;
    }
    let mut b = &p[36..];
    let rate = b.get_i32_le();
    if rate <= 0 {
        return None;
    }
    b.advance(8);
    let channels = b.get_i32_le();
    let bitrate = b.get_i32_le();
    b.advance(12);
    let extra_headers = b.get_i32_le().clamp(0, 16) as usize;
    let rate = rate as u32;
    let mut id = Ident::new(
        OggCodec::Speex,
        StreamKind::Audio,
        CodecTag::Named("speex"),
        rate as f64,
        TimeBase::new(1, rate),
    );
    id.headers = Some(2 + extra_headers);
    id.audio = Some(AudioParams {
        channels: channels.clamp(1, 2) as u16,
        sample_rate: rate,
        avg_bytes_per_sec: (bitrate.max(0) / 8) as u32,
        ..Default::default()
    });
    Some(id)
}

/// OggDS stream header, one byte of packet type before it.
fn ogm(p: &[u8]) -> Option<Ident> {
    if p.len() < 53 || p[0] & 0x07 != OGM_HEADER {
        return None;
    }
    let stream_type = &p[1..9];
    let subtype: [u8; 4] = p[9..13].try_into().ok()?;
    let mut b = &p[13..];
    let size = b.get_i32_le();
    let time_unit = b.get_i64_le();
    let samples_per_unit = b.get_i64_le();
    let _default_len = b.get_i32_le();
    let _buffer_size = b.get_i32_le();
    let bits_per_sample = b.get_i16_le();
    let _padding = b.get_i16_le();

    let mut id = if stream_type.starts_with(b"video") {
        if time_unit <= 0 {
            return None;
        }
        let width = b.get_i32_le();
        let height = b.get_i32_le();
        let fps = 10_000_000.0 / time_unit as f64;
        let mut id = Ident::new(
            OggCodec::Ogm,
            StreamKind::Video,
            CodecTag::FourCC(FourCC(subtype)),
            fps,
            TimeBase::new(u32::try_from(time_unit).ok()?, 10_000_000),
        );
        id.video = Some(VideoParams {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
            fps: Some(fps),
        });
        id
    } else if stream_type.starts_with(b"audio") {
        let rate = u32::try_from(samples_per_unit).ok().filter(|&r| r > 0)?;
        let channels = b.get_i16_le();
        let block_align = b.get_i16_le();
        let avg_bytes = b.get_i32_le();
        let tag = std::str::from_utf8(&subtype)
            .ok()
            .and_then(|s| u16::from_str_radix(s.trim(), 16).ok())
            .unwrap_or(0);
        let mut id = Ident::new(
            OggCodec::Ogm,
            StreamKind::Audio,
            CodecTag::Wave(tag),
            rate as f64,
            TimeBase::new(1, rate),
        );
        id.audio = Some(AudioParams {
            channels: channels.max(0) as u16,
            sample_rate: rate,
            bits_per_sample: bits_per_sample.max(0) as u16,
            block_align: block_align.max(0) as u16,
            avg_bytes_per_sec: avg_bytes.max(0) as u32,
        });
        let extra_len = (size.max(0) as usize).saturating_sub(52);
        id.extra = p.get(53..53 + extra_len).map(<[u8]>::to_vec).unwrap_or_default();
        id
    } else if stream_type.starts_with(b"text") {
        let rate = if time_unit > 0 { 10_000_000.0 / time_unit as f64 } else { 1000.0 };
        Ident::new(
            OggCodec::Ogm,
            StreamKind::Subtitle,
            CodecTag::Named("text"),
            rate,
            TimeBase::new(1, 1000),
        )
    } else {
        debug!("ogg: OggDS stream type {:?} unknown", String::from_utf8_lossy(stream_type));
        return None;
    };
    id.headers = None;
    Some(id)
}

/// Identifies a logical stream from its first packet.
pub fn identify(packet: &[u8]) -> Option<Ident> {
    if packet.len() >= 7 && &packet[..7] == b"\x01vorbis" {
        vorbis(packet)
    } else if packet.len() >= 7 && &packet[..7] == b"\x80theora" {
        theora(packet)
    } else if packet.starts_with(b"OpusHead") {
        opus(packet)
    } else if packet.len() >= 5 && &packet[..5] == b"\x7fFLAC" {
        flac(packet)
    } else if packet.starts_with(b"Speex   ") {
        speex(packet)
    } else {
        ogm(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vorbis_id(rate: u32) -> Vec<u8> {
        let mut p = b"\x01vorbis".to_vec();
        p.extend_from_slice(&0u32.to_le_bytes());
        p.push(2);
        p.extend_from_slice(&rate.to_le_bytes());
        p.extend_from_slice(&0i32.to_le_bytes());
        p.extend_from_slice(&128_000i32.to_le_bytes());
        p.extend_from_slice(&0i32.to_le_bytes());
        p.push(0xb8);
        p.push(1);
        p
    }

    fn theora_id(shift: u8) -> Vec<u8> {
        let mut p = b"\x80theora".to_vec();
        p.extend_from_slice(&[3, 2, 1]);
        p.extend_from_slice(&20u16.to_be_bytes());
        p.extend_from_slice(&15u16.to_be_bytes());
        p.extend_from_slice(&[0, 1, 64, 0, 0, 240, 0, 0]);
        p.extend_from_slice(&25u32.to_be_bytes());
        p.extend_from_slice(&1u32.to_be_bytes());
        p.extend_from_slice(&[0, 0, 1, 0, 0, 1, 0, 0, 0, 0]);
        let bits = (shift as u16 & 0x1f) << 5;
        p.extend_from_slice(&bits.to_be_bytes());
        p
    }

    #[test]
    fn test_vorbis() {
        let id = identify(&vorbis_id(44100)).unwrap();
        assert_eq!(id.codec, OggCodec::Vorbis);
        assert_eq!(id.headers, Some(3));
        assert_eq!(id.granule_pts(88200), Some(2.0));
        assert_eq!(id.granule_pts(-1), None);
    }

    #[test]
    fn test_theora_granule_shift() {
        let id = identify(&theora_id(6)).unwrap();
        assert_eq!(id.codec, OggCodec::Theora);
        assert_eq!(id.granule_shift, 6);
        assert_eq!(id.video.unwrap().width, 320);
        // keyframe 51, three frames after it, counted from one
        let granule = (51 << 6) | 3;
        assert_eq!(id.granule_units(granule), Some(53));
        assert_eq!(id.granule_key(granule), Some(50));
        assert_eq!(id.granule_pts(granule), Some(53.0 / 25.0));
        assert!(id.is_keyframe(&[0x00, 0x12]));
        assert!(!id.is_keyframe(&[0x40, 0x12]));
    }

    #[test]
    fn test_opus_pre_skip() {
        let mut p = b"OpusHead".to_vec();
        p.extend_from_slice(&[1, 2]);
        p.extend_from_slice(&312u16.to_le_bytes());
        p.extend_from_slice(&48000u32.to_le_bytes());
        p.extend_from_slice(&[0, 0, 0]);
        let id = identify(&p).unwrap();
        assert_eq!(id.headers, Some(2));
        assert_eq!(id.granule_units(312 + 48000), Some(48000));
        assert_eq!(id.granule_units(100), Some(0));
    }

    #[test]
    fn test_ogm_video_and_payload() {
        let mut p = vec![0x01];
        p.extend_from_slice(b"video\0\0\0");
        p.extend_from_slice(b"XVID");
        p.extend_from_slice(&52i32.to_le_bytes());
        p.extend_from_slice(&400_000i64.to_le_bytes());
        p.extend_from_slice(&0i64.to_le_bytes());
        p.extend_from_slice(&0i32.to_le_bytes());
        p.extend_from_slice(&0i32.to_le_bytes());
        p.extend_from_slice(&24i16.to_le_bytes());
        p.extend_from_slice(&0i16.to_le_bytes());
        p.extend_from_slice(&640i32.to_le_bytes());
        p.extend_from_slice(&480i32.to_le_bytes());
        let id = identify(&p).unwrap();
        assert_eq!(id.kind, StreamKind::Video);
        assert_eq!(id.rate, 25.0);
        assert_eq!(id.tag, CodecTag::FourCC(FourCC::new(b"XVID")));
        assert_eq!(id.headers, None);

        assert_eq!(ogm_payload(&[0x08, 1, 2, 3]), Some(&[1u8, 2, 3][..]));
        assert_eq!(ogm_payload(&[0x48, 9, 1, 2]), Some(&[1u8, 2][..]));
        assert_eq!(ogm_payload(&[0x03, b'c']), None);
        assert!(id.is_keyframe(&[0x08]));
        assert!(!id.is_keyframe(&[0x00]));
    }

    #[test]
    fn test_unknown() {
        assert_eq!(identify(b"\x01nothing at all"), None);
        assert_eq!(identify(&[]), None);
    }
}
