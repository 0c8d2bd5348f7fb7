//! Data packet parsing: error-correction prefix, payload parsing
//! information and one or more payloads.

use crate::error::{DemuxError, Result};
use bytes::{Buf, Bytes};
use log::{debug, trace};

/// One media-object piece carried by a data packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub stream: u32,
    pub keyframe: bool,
    /// Media object number.
    pub object: u32,
    /// Offset of this piece inside the media object.
    pub offset: u32,
    /// Media object size from the replicated data, or the whole piece for
    /// grouped payloads.
    pub object_size: Option<u32>,
    /// Presentation time in milliseconds, preroll included.
    pub time_ms: u32,
    pub data: Bytes,
    /// Came out of a grouped payload and is a complete object.
    pub grouped: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPacket {
    pub send_time: u32,
    pub duration: u16,
    pub payloads: Vec<Payload>,
    /// Parsing stopped early on a malformed payload.
    pub damaged: bool,
}

fn short(what: &str) -> DemuxError {
    DemuxError::BrokenFragment(format!("packet too short for {}", what))
}

/// Variable-width field: the low two bits of `code` select 0, 1, 2 or 4
/// bytes; width 0 yields `default`.
fn varlen(buf: &mut &[u8], code: u8, default: u32) -> Result<u32> {
    let width = match code & 3 {
        0 => return Ok(default),
        1 => 1,
        2 => 2,
        _ => 4,
    };
    if buf.remaining() < width {
        return Err(short("a length field"));
    }
    Ok(match width {
        1 => buf.get_u8() as u32,
        2 => buf.get_u16_le() as u32,
        _ => buf.get_u32_le(),
    })
}

/// Parses one data packet of the fixed `packet_size`.
pub fn parse_packet(packet: &Bytes, packet_size: u32) -> Result<DataPacket> {
    let total = packet.len();
    let mut buf: &[u8] = packet;
    if buf.remaining() < 2 {
        return Err(short("flags"));
    }
    let mut flags = buf.get_u8();
    if flags & 0x80 != 0 {
        let ecc_len = (flags & 0x0f) as usize;
        if buf.remaining() < ecc_len + 2 {
            return Err(short("error correction data"));
        }
        buf.advance(ecc_len);
        flags = buf.get_u8();
    }
    let props = buf.get_u8();

    let explicit_len = varlen(&mut buf, flags >> 5, 0)?;
    let _sequence = varlen(&mut buf, flags >> 1, 0)?;
    let padding = varlen(&mut buf, flags >> 3, 0)?;
    let plen = if (flags >> 5) & 3 != 0 {
        if explicit_len > packet_size {
            debug!("asf: packet length {} over packet size {}", explicit_len, packet_size);
        }
        explicit_len as usize
    } else {
        packet_size.saturating_sub(padding) as usize
    };

    if buf.remaining() < 6 {
        return Err(short("send time"));
    }
    let mut out = DataPacket {
        send_time: buf.get_u32_le(),
        duration: buf.get_u16_le(),
        ..Default::default()
    };

    let multiple = flags & 1 != 0;
    let (count, size_code) = if multiple {
        if !buf.has_remaining() {
            return Err(short("payload flags"));
        }
        let b = buf.get_u8();
        (b & 0x3f, b >> 6)
    } else {
        (1, 0)
    };

    for _ in 0..count {
        if !buf.has_remaining() {
            debug!("asf: packet ends before all {} payloads", count);
            out.damaged = true;
            break;
        }
        match parse_payload(packet, &mut buf, total, plen, props, multiple, size_code, &mut out.payloads) {
            Ok(()) => {}
            Err(e) => {
                debug!("asf: payload dropped: {}", e);
                out.damaged = true;
                break;
            }
        }
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn parse_payload(
    packet: &Bytes,
    buf: &mut &[u8],
    total: usize,
    plen: usize,
    props: u8,
    multiple: bool,
    size_code: u8,
    out: &mut Vec<Payload>,
) -> Result<()> {
    let b = buf.get_u8();
    let stream = (b & 0x7f) as u32;
    let keyframe = b & 0x80 != 0;
    let mut object = varlen(buf, props >> 4, 0)?;
    let offset = varlen(buf, props >> 2, 0)?;
    let rep_len = varlen(buf, props, 0)? as usize;

    let mut object_size = None;
    let mut time_ms = offset;
    let grouped = rep_len == 1;
    if grouped {
        if !buf.has_remaining() {
            return Err(short("presentation time delta"));
        }
        buf.advance(1);
    } else if rep_len >= 8 {
        if buf.remaining() < rep_len {
            return Err(short("replicated data"));
        }
        object_size = Some(buf.get_u32_le());
        time_ms = buf.get_u32_le();
        buf.advance(rep_len - 8);
    } else {
        trace!("asf: replicated data of {} bytes", rep_len);
        if buf.remaining() < rep_len {
            return Err(short("replicated data"));
        }
        buf.advance(rep_len);
        time_ms = 0;
    }

    let consumed = total - buf.remaining();
    let default_len = plen.saturating_sub(consumed) as u32;
    let mut len = if multiple {
        varlen(buf, size_code, default_len)? as usize
    } else {
        default_len as usize
    };
    if len > buf.remaining() {
        debug!("asf: payload length {} over the {} bytes left", len, buf.remaining());
        len = buf.remaining();
    }
    let start = total - buf.remaining();

    if grouped {
        let mut at = start;
        let end = start + len;
        while at < end {
            let sub = packet[at] as usize;
            at += 1;
            if at + sub > end {
                debug!("asf: grouped payload overruns its length");
                break;
            }
            out.push(Payload {
                stream,
                keyframe,
                object,
                offset: 0,
                object_size: Some(sub as u32),
                time_ms,
                data: packet.slice(at..at + sub),
                grouped: true,
            });
            at += sub;
            object = object.wrapping_add(1);
        }
    } else if len > 0 {
        out.push(Payload {
            stream,
            keyframe,
            object,
            offset,
            object_size,
            time_ms,
            data: packet.slice(start..start + len),
            grouped: false,
        });
    }
    buf.advance(len);
    Ok(())
}
