//! TwinVQ (`.vqf`): a `TWIN` header of tagged chunks closed by `DATA`, then
//! a constant-bitrate bitstream cut into fixed-size packets.

use super::{percent_of, DemuxContext, Fill, FormatDemuxer, FormatDriver, Probe, Query, QueryAnswer};
use crate::av::{AudioParams, CodecTag, Packet, Stream, StreamKind, TimeBase};
use crate::error::{DemuxError, Result};
use crate::io::{ByteSource, ByteSourceExt, DataRegion};
use crate::seek::{align_down, SeekOutcome, SeekRequest};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, info, trace};

const MAGIC: &[u8; 4] = b"TWIN";
const VERSION_LEN: usize = 8;
const MAX_HEADER_CHUNKS: usize = 64;
const MAX_CHUNK: u32 = 1 << 20;
/// Packets cut from each second of the bitstream.
const PACKETS_PER_SEC: u32 = 8;

const AUDIO_ID: u32 = 0;

/// Fields of the `COMM` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonChunk {
    pub channels: u16,
    /// Kilobits per second.
    pub bitrate: u32,
    pub sample_rate: u32,
}

impl CommonChunk {
    pub fn parse(mut body: &[u8]) -> Result<Self> {
        if body.len() < 12 {
            return Err(DemuxError::HeaderMalformed("COMM chunk too short".into()));
        }
        let raw_channels = body.get_u32();
        let channels = u16::try_from(raw_channels)
            .ok()
            .and_then(|c| c.checked_add(1))
            .ok_or_else(|| DemuxError::HeaderMalformed(format!("COMM: {} channels", raw_channels as u64 + 1)))?;
        let bitrate = body.get_u32();
        let sample_rate = match body.get_u32() {
            11 => 11025,
            22 => 22050,
            44 => 44100,
            khz => khz
                .checked_mul(1000)
                .ok_or_else(|| DemuxError::HeaderMalformed(format!("COMM: sample rate {} kHz", khz)))?,
        };
        Ok(Self {
            channels,
            bitrate,
            sample_rate,
        })
    }

    /// `None` when the bitrate does not fit a 32-bit byte rate.
    pub fn bytes_per_sec(&self) -> Option<u32> {
        self.bitrate.checked_mul(125)
    }
}

pub struct VqfDemuxer {
    bytes_per_sec: u64,
    packet_size: u64,
}

impl VqfDemuxer {
    pub fn open(ctx: &mut DemuxContext<'_>) -> Result<Self> {
        let src = &mut *ctx.source;
        if src.read_fourcc()?.0 != *MAGIC {
            return Err(DemuxError::HeaderMalformed("missing TWIN signature".into()));
        }
        let version = src.read_bytes(VERSION_LEN)?;
        let header_len = src.read_u32_be()?;
        debug!(
            "vqf: version {}, header {} bytes",
            String::from_utf8_lossy(&version),
            header_len
        );

        let mut comm = None;
        let mut comm_raw = Bytes::new();
        let mut title = None;
        let mut found_data = false;
        for _ in 0..MAX_HEADER_CHUNKS {
            let tag = src.read_fourcc()?;
            if tag.0 == *b"DATA" {
                found_data = true;
                break;
            }
            let len = src.read_u32_be()?;
            if len > MAX_CHUNK {
                return Err(DemuxError::HeaderMalformed(format!("{} chunk of {} bytes", tag, len)));
            }
            let body = src.read_bytes(len as usize)?;
            trace!("vqf: header chunk {} of {} bytes", tag, len);
            match &tag.0 {
                b"COMM" => {
                    comm = Some(CommonChunk::parse(&body)?);
                    comm_raw = body;
                }
                b"NAME" => {
                    let text = String::from_utf8_lossy(&body).trim_end_matches('\0').to_string();
                    title = Some(text);
                }
                _ => {}
            }
        }
        if !found_data {
            return Err(DemuxError::HeaderMalformed("no DATA chunk".into()));
        }
        let comm = comm.ok_or_else(|| DemuxError::HeaderMalformed("no COMM chunk".into()))?;
        if comm.bitrate == 0 || comm.sample_rate == 0 {
            return Err(DemuxError::HeaderMalformed(format!("unusable COMM chunk {:?}", comm)));
        }

        let avg_bytes_per_sec = comm
            .bytes_per_sec()
            .ok_or_else(|| DemuxError::HeaderMalformed(format!("COMM: bitrate {} kbit/s", comm.bitrate)))?;
        let bytes_per_sec = avg_bytes_per_sec as u64;
        let packet_size = (bytes_per_sec / PACKETS_PER_SEC as u64).max(1);
        let block_align = u16::try_from(packet_size)
            .map_err(|_| DemuxError::HeaderMalformed(format!("COMM: {}-byte packets", packet_size)))?;
        let start = ctx.source.tell();
        *ctx.region = DataRegion::new(start, ctx.source.len().unwrap_or(u64::MAX));
        info!(
            "vqf: {} ch, {} Hz, {} kbit/s, data at {}",
            comm.channels, comm.sample_rate, comm.bitrate, start
        );

        let mut extra = BytesMut::from(&comm_raw[..]);
        extra.truncate(12);
        let mut stream = Stream::new(AUDIO_ID, StreamKind::Audio, CodecTag::Named("twinvq"))
            .with_time_base(TimeBase::new(1, comm.sample_rate))
            .with_extra_data(extra.freeze())
            .with_audio(AudioParams {
                channels: comm.channels,
                sample_rate: comm.sample_rate,
                bits_per_sample: 16,
                block_align,
                avg_bytes_per_sec,
            });
        stream.name = title;
        ctx.streams.add(stream)?;

        Ok(Self {
            bytes_per_sec,
            packet_size,
        })
    }

    fn pts_at(&self, region: DataRegion, pos: u64) -> f64 {
        pos.saturating_sub(region.start) as f64 / self.bytes_per_sec as f64
    }

    fn duration(&self, region: DataRegion) -> Option<f64> {
        (region.end != u64::MAX).then(|| self.pts_at(region, region.end))
    }
}

impl FormatDemuxer for VqfDemuxer {
    fn fill_buffer(&mut self, ctx: &mut DemuxContext<'_>, _wanted: Option<u32>) -> Result<Fill> {
        let pos = ctx.source.tell();
        if pos >= ctx.region.end {
            return Ok(Fill::EndOfData);
        }
        let want = self.packet_size.min(ctx.region.end - pos) as usize;
        let mut buf = vec![0u8; want];
        let got = ctx.source.read(&mut buf)?;
        if got == 0 {
            return Ok(Fill::EndOfData);
        }
        buf.truncate(got);
        let packet = Packet::new(buf)
            .with_stream_id(AUDIO_ID)
            .with_pts(self.pts_at(*ctx.region, pos))
            .with_pos(pos)
            .with_key_flag(true);
        ctx.streams.push(packet);
        Ok(Fill::Filled)
    }

    fn seek(&mut self, ctx: &mut DemuxContext<'_>, req: SeekRequest) -> Result<SeekOutcome> {
        let region = *ctx.region;
        let current = ctx.source.tell();
        let Some((target, clamped)) = req.target_offset(region, current, Some(self.bytes_per_sec as f64)) else {
            return Ok(SeekOutcome::Unsupported);
        };
        let pos = align_down(region, target, self.packet_size);
        ctx.source.seek(pos)?;
        debug!("vqf: seek to {} ({:.3}s)", pos, self.pts_at(region, pos));
        Ok(SeekOutcome::Moved { pos, clamped })
    }

    fn control(&mut self, ctx: &mut DemuxContext<'_>, query: Query) -> QueryAnswer {
        match query {
            Query::Duration => self
                .duration(*ctx.region)
                .map(QueryAnswer::Value)
                .unwrap_or(QueryAnswer::DontKnow),
            Query::PercentPosition => percent_of(*ctx.region, ctx.source.tell()),
        }
    }
}

pub struct VqfDriver;

impl FormatDriver for VqfDriver {
    fn name(&self) -> &'static str {
        "vqf"
    }

    fn probe(&self, source: &mut dyn ByteSource, _probe_size: usize) -> Result<Probe> {
        let head = source.peek(4 + VERSION_LEN)?;
        if head.len() < 4 || &head[..4] != MAGIC {
            return Ok(Probe::No);
        }
        let versioned = head.len() == 4 + VERSION_LEN && head[4..].iter().all(u8::is_ascii_digit);
        Ok(if versioned { Probe::Definite } else { Probe::Low })
    }

    fn open(&self, ctx: &mut DemuxContext<'_>) -> Result<Box<dyn FormatDemuxer>> {
        Ok(Box::new(VqfDemuxer::open(ctx)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemuxConfig;
    use crate::io::Source;
    use crate::Demuxer;
    use pretty_assertions::assert_eq;

    /// Mono 8 kbit/s at 22050 Hz: 1000 bytes per second, 125-byte packets.
    fn vqf_file(data_len: usize) -> Vec<u8> {
        vqf_file_at(8, data_len)
    }

    fn vqf_file_at(bitrate: u32, data_len: usize) -> Vec<u8> {
        let mut comm = Vec::new();
        comm.extend_from_slice(&0u32.to_be_bytes());
        comm.extend_from_slice(&bitrate.to_be_bytes());
        comm.extend_from_slice(&22u32.to_be_bytes());
        comm.extend_from_slice(&0u32.to_be_bytes());
        let name = b"Demo Song\0";

        let mut out = b"TWIN97012000".to_vec();
        out.extend_from_slice(&((8 + comm.len() + 8 + name.len()) as u32).to_be_bytes());
        out.extend_from_slice(b"COMM");
        out.extend_from_slice(&(comm.len() as u32).to_be_bytes());
        out.extend_from_slice(&comm);
        out.extend_from_slice(b"NAME");
        out.extend_from_slice(&(name.len() as u32).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(b"DATA");
        out.extend((0..data_len).map(|i| (i / 125) as u8));
        out
    }

    #[test]
    fn test_common_chunk_rates() {
        let mut body = vec![0, 0, 0, 1, 0, 0, 0, 48, 0, 0, 0, 44];
        assert_eq!(
            CommonChunk::parse(&body).unwrap(),
            CommonChunk { channels: 2, bitrate: 48, sample_rate: 44100 }
        );
        body[11] = 16;
        assert_eq!(CommonChunk::parse(&body).unwrap().sample_rate, 16000);
        assert!(CommonChunk::parse(&body[..8]).is_err());
    }

    #[test]
    fn test_common_chunk_out_of_range() {
        let too_many_channels = [0, 0, 0xFF, 0xFF, 0, 0, 0, 8, 0, 0, 0, 22];
        assert!(matches!(
            CommonChunk::parse(&too_many_channels),
            Err(DemuxError::HeaderMalformed(_))
        ));
        let u16_max_channels = [0, 0, 0xFF, 0xFE, 0, 0, 0, 8, 0, 0, 0, 22];
        assert_eq!(CommonChunk::parse(&u16_max_channels).unwrap().channels, u16::MAX);
        let huge_rate = [0, 0, 0, 0, 0, 0, 0, 8, 0x40, 0, 0, 0];
        assert!(matches!(CommonChunk::parse(&huge_rate), Err(DemuxError::HeaderMalformed(_))));

        let comm = CommonChunk { channels: 1, bitrate: 0x4000_0000, sample_rate: 22050 };
        assert_eq!(comm.bytes_per_sec(), None);
    }

    #[test]
    fn test_oversized_bitrate_is_rejected() {
        for bitrate in [0x4000_0000, u32::MAX, 5000] {
            let source = Source::from_bytes(vqf_file_at(bitrate, 1000));
            let opened = Demuxer::open(source, Some("vqf"), DemuxConfig::default());
            assert!(
                matches!(opened, Err(DemuxError::HeaderMalformed(_))),
                "bitrate {} gave {:?}",
                bitrate,
                opened.map(|d| d.format_name())
            );
        }
        // largest packet that still fits a block alignment
        let source = Source::from_bytes(vqf_file_at(4194, 1000));
        let demuxer = Demuxer::open(source, Some("vqf"), DemuxConfig::default()).unwrap();
        let audio = demuxer.stream(AUDIO_ID).and_then(|s| s.audio).unwrap();
        assert_eq!((audio.block_align, audio.avg_bytes_per_sec), (65531, 524250));
    }

    #[test]
    fn test_probe() {
        let mut src = Source::from_bytes(vqf_file(10));
        assert_eq!(VqfDriver.probe(&mut src, 2048).unwrap(), Probe::Definite);
        let mut bare = Source::from_bytes(b"TWINxxxxxxxx".to_vec());
        assert_eq!(VqfDriver.probe(&mut bare, 2048).unwrap(), Probe::Low);
    }

    #[test]
    fn test_packets_and_byte_rate_seek() {
        let mut demuxer = Demuxer::open(Source::from_bytes(vqf_file(3000)), None, DemuxConfig::default()).unwrap();
        assert_eq!(demuxer.format_name(), "vqf");
        assert_eq!(demuxer.stream(AUDIO_ID).and_then(|s| s.name.clone()), Some("Demo Song".to_string()));
        assert_eq!(demuxer.query(Query::Duration), QueryAnswer::Value(3.0));
        let start = demuxer.data_region().start;

        let first = demuxer.next_packet(AUDIO_ID).unwrap().unwrap();
        assert_eq!((first.len(), first.pts, first.pos), (125, 0.0, start));

        let outcome = demuxer.seek(SeekRequest::absolute(1.3)).unwrap();
        assert_eq!(outcome, SeekOutcome::Moved { pos: start + 1250, clamped: false });
        // the packet straddling the target is dropped on resync
        let packet = demuxer.next_packet(AUDIO_ID).unwrap().unwrap();
        assert_eq!((packet.pts, packet.data[0]), (1.375, 11));

        demuxer.seek(SeekRequest::fraction(0.5)).unwrap();
        let count = std::iter::from_fn(|| demuxer.next_packet(AUDIO_ID).unwrap()).count();
        assert_eq!(count, 12);
    }
}
