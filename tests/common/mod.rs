//! Writers for small synthetic container files.
#![allow(dead_code)]

use vdkdemux::utils::OggCrc;

fn chunk(out: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(id);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
}

fn list(out: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    let mut inner = kind.to_vec();
    inner.extend_from_slice(body);
    chunk(out, b"LIST", &inner);
}

fn u16s(out: &mut Vec<u8>, values: &[u16]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn u32s(out: &mut Vec<u8>, values: &[u32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// One record of the `movi` list.
#[derive(Debug, Clone)]
pub struct Record {
    pub tag: [u8; 4],
    pub data: Vec<u8>,
    pub key: bool,
}

impl Record {
    pub fn video(data: Vec<u8>, key: bool) -> Self {
        Self { tag: *b"00dc", data, key }
    }

    pub fn audio(data: Vec<u8>) -> Self {
        Self { tag: *b"01wb", data, key: true }
    }

    pub fn junk(len: usize) -> Self {
        Self { tag: *b"JUNK", data: vec![0; len], key: false }
    }
}

/// MJPG video at 25 fps, optionally with 8 kHz mono 8-bit PCM as stream 1.
#[derive(Debug, Clone, Default)]
pub struct AviBuilder {
    pub audio: bool,
    pub idx1: bool,
    /// Writes an OpenDML super index for stream 0 pointing at one `ix00`
    /// chunk after the data list. Every video entry carries the tag `00dc`
    /// whatever the record itself is tagged.
    pub odml: bool,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone)]
pub struct AviFile {
    pub bytes: Vec<u8>,
    /// Header position of every record, in file order.
    pub offsets: Vec<u64>,
    pub movi_start: u64,
}

impl AviBuilder {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    fn is_media(tag: &[u8; 4]) -> bool {
        tag[..2].iter().all(u8::is_ascii_digit)
    }

    fn header_list(&self, ix_offset: u64) -> Vec<u8> {
        let frames = self.records.iter().filter(|r| &r.tag[..2] == b"00").count() as u32;
        let audio_bytes: u32 = self
            .records
            .iter()
            .filter(|r| &r.tag[..2] == b"01")
            .map(|r| r.data.len() as u32)
            .sum();
        let streams = if self.audio { 2 } else { 1 };

        let mut avih = Vec::new();
        u32s(&mut avih, &[40_000, 0, 0, 0x10, frames, 0, streams, 0, 64, 48]);
        avih.extend_from_slice(&[0; 16]);

        let mut strh = b"vidsMJPG".to_vec();
        u32s(&mut strh, &[0]);
        u16s(&mut strh, &[0, 0]);
        u32s(&mut strh, &[0, 1, 25, 0, frames, 0, 0, 0]);
        strh.extend_from_slice(&[0; 8]);
        let mut strf = Vec::new();
        u32s(&mut strf, &[40, 64, 48]);
        u16s(&mut strf, &[1, 24]);
        strf.extend_from_slice(b"MJPG");
        u32s(&mut strf, &[0, 0, 0, 0, 0]);

        let mut strl = Vec::new();
        chunk(&mut strl, b"strh", &strh);
        chunk(&mut strl, b"strf", &strf);
        if self.odml {
            let mut indx = Vec::new();
            u16s(&mut indx, &[4]);
            indx.extend_from_slice(&[0, 0]);
            u32s(&mut indx, &[1]);
            indx.extend_from_slice(b"00dc");
            indx.extend_from_slice(&[0; 12]);
            indx.extend_from_slice(&ix_offset.to_le_bytes());
            u32s(&mut indx, &[24 + 8 * frames, frames]);
            chunk(&mut strl, b"indx", &indx);
        }

        let mut hdrl = Vec::new();
        chunk(&mut hdrl, b"avih", &avih);
        list(&mut hdrl, b"strl", &strl);

        if self.audio {
            let mut strh = b"auds".to_vec();
            strh.extend_from_slice(&[0; 4]);
            u32s(&mut strh, &[0]);
            u16s(&mut strh, &[0, 0]);
            u32s(&mut strh, &[0, 1, 8000, 0, audio_bytes, 0, 0, 1]);
            strh.extend_from_slice(&[0; 8]);
            let mut strf = Vec::new();
            u16s(&mut strf, &[1, 1]);
            u32s(&mut strf, &[8000, 8000]);
            u16s(&mut strf, &[1, 8, 0]);
            let mut strl = Vec::new();
            chunk(&mut strl, b"strh", &strh);
            chunk(&mut strl, b"strf", &strf);
            list(&mut hdrl, b"strl", &strl);
        }
        hdrl
    }

    /// `ix00` over the video records at `offsets`.
    fn ix_chunk(&self, offsets: &[u64]) -> Vec<u8> {
        let video: Vec<(&Record, u64)> = self
            .records
            .iter()
            .zip(offsets)
            .filter(|(r, _)| &r.tag[..2] == b"00")
            .map(|(r, &o)| (r, o))
            .collect();
        let mut body = Vec::new();
        u16s(&mut body, &[2]);
        body.extend_from_slice(&[0, 1]);
        u32s(&mut body, &[video.len() as u32]);
        body.extend_from_slice(b"00dc");
        body.extend_from_slice(&0u64.to_le_bytes());
        u32s(&mut body, &[0]);
        for (record, offset) in video {
            let delta = if record.key { 0 } else { 0x8000_0000 };
            u32s(&mut body, &[offset as u32 + 8, record.data.len() as u32 | delta]);
        }
        let mut out = Vec::new();
        chunk(&mut out, b"ix00", &body);
        out
    }

    fn write(&self, ix_offset: u64) -> (AviFile, u64) {
        let mut hdrl_list = Vec::new();
        list(&mut hdrl_list, b"hdrl", &self.header_list(ix_offset));

        let movi_start = (12 + hdrl_list.len() + 12) as u64;
        let mut movi = Vec::new();
        let mut offsets = Vec::new();
        for record in &self.records {
            offsets.push(movi_start + movi.len() as u64);
            chunk(&mut movi, &record.tag, &record.data);
        }

        let mut body = b"AVI ".to_vec();
        body.extend_from_slice(&hdrl_list);
        list(&mut body, b"movi", &movi);
        let ix_at = body.len() as u64 + 8;
        if self.odml {
            body.extend_from_slice(&self.ix_chunk(&offsets));
        }
        if self.idx1 {
            let mut idx1 = Vec::new();
            for (record, offset) in self.records.iter().zip(&offsets) {
                if !Self::is_media(&record.tag) {
                    continue;
                }
                idx1.extend_from_slice(&record.tag);
                let flags = if record.key { 0x10 } else { 0 };
                u32s(&mut idx1, &[flags, (offset - (movi_start - 4)) as u32, record.data.len() as u32]);
            }
            chunk(&mut body, b"idx1", &idx1);
        }

        let mut bytes = Vec::new();
        chunk(&mut bytes, b"RIFF", &body);
        (
            AviFile {
                bytes,
                offsets,
                movi_start,
            },
            ix_at,
        )
    }

    pub fn build(&self) -> AviFile {
        let (file, ix_at) = self.write(0);
        if !self.odml {
            return file;
        }
        self.write(ix_at).0
    }
}

/// Ogg page with a valid checksum. `packets` are complete unless
/// `last_open` leaves the final one to continue on the next page.
pub fn ogg_page(
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
            lacing.push(255u8);
            left -= 255;
        }
        body.extend_from_slice(packet);
        if !(last_open && i + 1 == packets.len()) {
            lacing.push(left as u8);
        }
    }
    let start = out.len();
    out.extend_from_slice(b"OggS");
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
    out[start + 22..start + 26].copy_from_slice(&crc.to_le_bytes());
}

pub const OGG_BOS: u8 = 0x02;

#[derive(Debug, Clone)]
pub struct OggFile {
    pub bytes: Vec<u8>,
    /// Start of every data page.
    pub pages: Vec<u64>,
}

/// Mono Vorbis at 1000 Hz: the identification page, one page with the
/// comment and setup headers, then `pages` data pages of two 60-byte
/// packets, 250 samples each. Packet bytes are `2 * page` and
/// `2 * page + 1`, pages counted from 1.
pub fn vorbis_file(pages: u32) -> OggFile {
    let mut id = b"\x01vorbis".to_vec();
    id.extend_from_slice(&0u32.to_le_bytes());
    id.push(1);
    id.extend_from_slice(&1000u32.to_le_bytes());
    id.extend_from_slice(&[0; 12]);
    id.extend_from_slice(&[0xb8, 1]);

    let serial = 0x1234;
    let mut bytes = Vec::new();
    ogg_page(&mut bytes, OGG_BOS, 0, serial, 0, &[&id], false);
    ogg_page(&mut bytes, 0, 0, serial, 1, &[b"\x03vorbis-comment", b"\x05vorbis-setup"], false);
    let mut offsets = Vec::new();
    for i in 1..=pages {
        offsets.push(bytes.len() as u64);
        let a = vec![(2 * i) as u8; 60];
        let b = vec![(2 * i + 1) as u8; 60];
        ogg_page(&mut bytes, 0, i as i64 * 500, serial, 1 + i, &[&a, &b], false);
    }
    OggFile {
        bytes,
        pages: offsets,
    }
}

pub const ASF_HEADER: [u8; 16] = [
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];
const ASF_DATA: [u8; 16] = [
    0x36, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];
const ASF_FILE_PROPERTIES: [u8; 16] = [
    0xA1, 0xDC, 0xAB, 0x8C, 0x47, 0xA9, 0xCF, 0x11, 0x8E, 0xE4, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65,
];
const ASF_STREAM_PROPERTIES: [u8; 16] = [
    0x91, 0x07, 0xDC, 0xB7, 0xB7, 0xA9, 0xCF, 0x11, 0x8E, 0xE6, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65,
];
const ASF_AUDIO_MEDIA: [u8; 16] = [
    0x40, 0x9E, 0x69, 0xF8, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B,
];
const ASF_VIDEO_MEDIA: [u8; 16] = [
    0xC0, 0xEF, 0x19, 0xBC, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B,
];

pub const ASF_PACKET_SIZE: usize = 256;
pub const ASF_PREROLL_MS: u64 = 100;

/// One payload of an ASF data packet.
#[derive(Debug, Clone)]
pub enum AsfPayload {
    /// A media object or a piece of one, with 8 bytes of replicated data.
    Piece {
        stream: u8,
        key: bool,
        object: u8,
        offset: u32,
        object_size: u32,
        time_ms: u32,
        data: Vec<u8>,
    },
    /// Several small objects behind one payload header.
    Group {
        stream: u8,
        object: u8,
        time_ms: u32,
        items: Vec<Vec<u8>>,
    },
}

/// A packet of [`ASF_PACKET_SIZE`] bytes: error correction prefix, byte-wide
/// sequence and padding fields, and either one payload or several behind
/// word-sized lengths.
pub fn asf_packet(payloads: &[AsfPayload]) -> Vec<u8> {
    let multiple = payloads.len() > 1 || matches!(payloads.first(), Some(AsfPayload::Group { .. }));
    let mut p = vec![0x82, 0x00, 0x00];
    p.push(0x0A | multiple as u8);
    p.push(0x5D);
    p.push(0);
    let padding_at = p.len();
    p.push(0);
    p.extend_from_slice(&0u32.to_le_bytes());
    p.extend_from_slice(&0u16.to_le_bytes());
    if multiple {
        p.push(payloads.len() as u8 | 0x80);
    }
    for payload in payloads {
        match payload {
            AsfPayload::Piece {
                stream,
                key,
                object,
                offset,
                object_size,
                time_ms,
                data,
            } => {
                p.push(stream | if *key { 0x80 } else { 0 });
                p.push(*object);
                p.extend_from_slice(&offset.to_le_bytes());
                p.push(8);
                p.extend_from_slice(&object_size.to_le_bytes());
                p.extend_from_slice(&time_ms.to_le_bytes());
                if multiple {
                    p.extend_from_slice(&(data.len() as u16).to_le_bytes());
                }
                p.extend_from_slice(data);
            }
            AsfPayload::Group {
                stream,
                object,
                time_ms,
                items,
            } => {
                p.push(stream | 0x80);
                p.push(*object);
                p.extend_from_slice(&time_ms.to_le_bytes());
                p.push(1);
                p.push(0);
                let mut body = Vec::new();
                for item in items {
                    body.push(item.len() as u8);
                    body.extend_from_slice(item);
                }
                p.extend_from_slice(&(body.len() as u16).to_le_bytes());
                p.extend_from_slice(&body);
            }
        }
    }
    assert!(p.len() <= ASF_PACKET_SIZE, "payloads overflow the packet");
    p[padding_at] = (ASF_PACKET_SIZE - p.len()) as u8;
    p.resize(ASF_PACKET_SIZE, 0);
    p
}

fn asf_object(out: &mut Vec<u8>, guid: &[u8; 16], content: &[u8]) {
    out.extend_from_slice(guid);
    out.extend_from_slice(&(24 + content.len() as u64).to_le_bytes());
    out.extend_from_slice(content);
}

fn asf_stream(number: u16, video: bool) -> Vec<u8> {
    let mut type_data = Vec::new();
    if video {
        u32s(&mut type_data, &[64, 48]);
        type_data.push(2);
        u16s(&mut type_data, &[40]);
        u32s(&mut type_data, &[40, 64, 48]);
        u16s(&mut type_data, &[1, 24]);
        type_data.extend_from_slice(b"WMV2");
        u32s(&mut type_data, &[0, 0, 0, 0, 0]);
    } else {
        u16s(&mut type_data, &[0x161, 1]);
        u32s(&mut type_data, &[8000, 1000]);
        u16s(&mut type_data, &[64, 16, 0]);
    }
    let mut content = Vec::new();
    content.extend_from_slice(if video { &ASF_VIDEO_MEDIA } else { &ASF_AUDIO_MEDIA });
    content.extend_from_slice(&[0; 16]);
    content.extend_from_slice(&0u64.to_le_bytes());
    u32s(&mut content, &[type_data.len() as u32, 0]);
    u16s(&mut content, &[number]);
    u32s(&mut content, &[0]);
    content.extend_from_slice(&type_data);
    content
}

/// Audio as stream 1, video as stream 2, `duration_secs` long after a
/// preroll of [`ASF_PREROLL_MS`].
pub fn asf_file(packets: &[Vec<u8>], duration_secs: u64) -> Vec<u8> {
    let mut props = vec![0u8; 32];
    props.extend_from_slice(&(packets.len() as u64).to_le_bytes());
    let play = (duration_secs * 1000 + ASF_PREROLL_MS) * 10_000;
    props.extend_from_slice(&play.to_le_bytes());
    props.extend_from_slice(&play.to_le_bytes());
    props.extend_from_slice(&ASF_PREROLL_MS.to_le_bytes());
    u32s(&mut props, &[2, ASF_PACKET_SIZE as u32, ASF_PACKET_SIZE as u32, 0]);

    let mut objects = Vec::new();
    asf_object(&mut objects, &ASF_FILE_PROPERTIES, &props);
    asf_object(&mut objects, &ASF_STREAM_PROPERTIES, &asf_stream(1, false));
    asf_object(&mut objects, &ASF_STREAM_PROPERTIES, &asf_stream(2, true));

    let mut out = Vec::new();
    out.extend_from_slice(&ASF_HEADER);
    out.extend_from_slice(&(30 + objects.len() as u64).to_le_bytes());
    u32s(&mut out, &[3]);
    out.extend_from_slice(&[1, 2]);
    out.extend_from_slice(&objects);

    out.extend_from_slice(&ASF_DATA);
    out.extend_from_slice(&(50 + (packets.len() * ASF_PACKET_SIZE) as u64).to_le_bytes());
    out.extend_from_slice(&[0; 16]);
    out.extend_from_slice(&(packets.len() as u64).to_le_bytes());
    out.extend_from_slice(&[1, 1]);
    for packet in packets {
        out.extend_from_slice(packet);
    }
    out
}
