use super::header::{self, AsfHeader, Scramble, SimpleIndex, StreamType};
use super::payload::{parse_packet, Payload};
use crate::av::{AudioParams, CodecTag, Stream, StreamKind, TimeBase, VideoParams};
use crate::error::{DemuxError, Result};
use crate::format::{
    percent_of, DemuxContext, Fill, FormatDemuxer, Fragment, Query, QueryAnswer, Reassembler,
};
use crate::io::{ByteSourceExt, DataRegion};
use crate::seek::{align_down, SeekOutcome, SeekRequest};
use bytes::Bytes;
use log::{debug, info, trace, warn};

struct Track {
    number: u32,
    reassembler: Reassembler,
    scramble: Option<Scramble>,
}

fn register(ctx: &mut DemuxContext<'_>, props: &header::StreamProperties) -> Result<bool> {
    let stream = match &props.stream_type {
        StreamType::Audio(wf) => {
            Stream::new(props.number, StreamKind::Audio, CodecTag::Wave(wf.format_tag)).with_audio(
                AudioParams {
                    channels: wf.channels,
                    sample_rate: wf.samples_per_sec,
                    bits_per_sample: wf.bits_per_sample,
                    block_align: wf.block_align,
                    avg_bytes_per_sec: wf.avg_bytes_per_sec,
                },
            )
        }
        StreamType::Video {
            width,
            height,
            info,
        } => Stream::new(props.number, StreamKind::Video, CodecTag::FourCC(info.compression))
            .with_video(VideoParams {
                width: *width,
                height: *height,
                fps: None,
            }),
        StreamType::Other(guid) => {
            debug!("asf: stream {} of type {:?} ignored", props.number, guid);
            return Ok(false);
        }
    };
    ctx.streams.add(
        stream
            .with_time_base(TimeBase::new(1, 1000))
            .with_extra_data(props.extra.clone()),
    )?;
    Ok(true)
}

/// Reads fixed-size data packets and rebuilds media objects per stream.
pub struct AsfDemuxer {
    packet_size: u32,
    preroll_ms: f64,
    duration: f64,
    bytes_per_sec: Option<f64>,
    tracks: Vec<Track>,
    simple_index: Option<SimpleIndex>,
    /// Latest timestamp handed to a queue.
    last_pts: f64,
    flushed: bool,
}

impl AsfDemuxer {
    pub fn open(ctx: &mut DemuxContext<'_>) -> Result<Self> {
        let header: AsfHeader = header::read_header(ctx.source)?;
        let file = &header.file;
        if file.min_packet_size != file.max_packet_size {
            warn!(
                "asf: packet sizes {}..{} differ, using {}",
                file.min_packet_size, file.max_packet_size, file.max_packet_size
            );
        }

        let mut tracks = Vec::new();
        for props in &header.streams {
            if register(ctx, props)? {
                tracks.push(Track {
                    number: props.number,
                    reassembler: Reassembler::new(),
                    scramble: props.scramble,
                });
            }
        }
        if let Some(title) = &header.title {
            info!("asf: title '{}'", title);
        }

        *ctx.region = DataRegion::new(header.data_start, header.data_end);
        let duration = file.duration();
        let bytes_per_sec = if file.max_bitrate > 0 {
            Some(file.max_bitrate as f64 / 8.0)
        } else if duration > 0.0 && ctx.region.end != u64::MAX {
            Some(ctx.region.len() as f64 / duration)
        } else {
            None
        };

        let mut simple_index = None;
        if ctx.source.is_seekable() && ctx.region.end != u64::MAX {
            match header::find_simple_index(ctx.source, ctx.region.end) {
                Ok(Some(index)) => {
                    debug!("asf: simple index with {} entries", index.entries.len());
                    simple_index = Some(index);
                }
                Ok(None) => {}
                Err(e) => warn!("asf: simple index unreadable: {}", e),
            }
            ctx.source.seek(ctx.region.start)?;
        }

        Ok(Self {
            packet_size: file.max_packet_size,
            preroll_ms: file.preroll as f64,
            duration,
            bytes_per_sec,
            tracks,
            simple_index,
            last_pts: 0.0,
            flushed: false,
        })
    }

    fn pts_of(&self, payload: &Payload) -> f64 {
        ((payload.time_ms as f64 - self.preroll_ms) / 1000.0).max(0.0)
    }

    /// Feeds one payload to its stream's reassembler. Returns whether a
    /// packet reached a selected stream.
    fn push_payload(&mut self, ctx: &mut DemuxContext<'_>, payload: &Payload, pos: u64) -> bool {
        let pts = self.pts_of(payload);
        let Some(track) = self.tracks.iter_mut().find(|t| t.number == payload.stream) else {
            trace!("asf: payload for unknown stream {}", payload.stream);
            ctx.diag.skipped_records += 1;
            return false;
        };
        if !ctx.streams.is_selected(track.number) {
            return false;
        }

        let frag = Fragment {
            stream_id: payload.stream,
            seq: payload.object,
            offset: (!payload.grouped).then_some(payload.offset),
            total_len: payload.object_size,
            data: &payload.data,
            pts,
            pos,
            keyframe: payload.keyframe,
            last: payload.grouped || payload.object_size.is_none(),
        };
        let scramble = track.scramble;
        let before = track.reassembler.stats();
        let mut delivered = false;
        let mut newest = None;
        let streams = &mut *ctx.streams;
        track.reassembler.push(frag, |mut packet| {
            if let Some(s) = &scramble {
                if !packet.is_corrupt {
                    packet.data = Bytes::from(s.descramble(&packet.data));
                }
            }
            newest = Some(packet.pts);
            delivered |= streams.push(packet);
        });
        ctx.diag.absorb(before, track.reassembler.stats());
        if let Some(pts) = newest {
            self.last_pts = pts;
        }
        delivered
    }

    /// Emits whatever the reassemblers still hold, once per end of data.
    fn flush_all(&mut self, ctx: &mut DemuxContext<'_>) -> bool {
        if self.flushed {
            return false;
        }
        self.flushed = true;
        let mut delivered = false;
        for track in &mut self.tracks {
            let before = track.reassembler.stats();
            if let Some(packet) = track.reassembler.flush() {
                delivered |= ctx.streams.push(packet);
            }
            ctx.diag.absorb(before, track.reassembler.stats());
        }
        delivered
    }

    fn reset_reassembly(&mut self) {
        for track in &mut self.tracks {
            track.reassembler.reset();
        }
        self.flushed = false;
    }
}

impl FormatDemuxer for AsfDemuxer {
    fn fill_buffer(&mut self, ctx: &mut DemuxContext<'_>, _wanted: Option<u32>) -> Result<Fill> {
        loop {
            let pos = ctx.source.tell();
            if pos >= ctx.region.end {
                return Ok(if self.flush_all(ctx) { Fill::Filled } else { Fill::EndOfData });
            }
            let data = match ctx.source.read_bytes(self.packet_size as usize) {
                Ok(data) => data,
                Err(DemuxError::ShortRead { got, .. }) => {
                    debug!("asf: last packet at {} cut short after {} bytes", pos, got);
                    return Ok(if self.flush_all(ctx) { Fill::Filled } else { Fill::EndOfData });
                }
                Err(DemuxError::EndOfData) => {
                    return Ok(if self.flush_all(ctx) { Fill::Filled } else { Fill::EndOfData });
                }
                Err(e) => return Err(e),
            };

            let packet = match parse_packet(&data, self.packet_size) {
                Ok(packet) => packet,
                Err(e) if e.is_recoverable() => {
                    warn!("asf: packet at {} skipped: {}", pos, e);
                    ctx.diag.skipped_records += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if packet.damaged {
                ctx.diag.broken_fragments += 1;
            }

            let mut delivered = false;
            for payload in &packet.payloads {
                delivered |= self.push_payload(ctx, payload, pos);
            }
            if delivered {
                return Ok(Fill::Filled);
            }
        }
    }

    fn seek(&mut self, ctx: &mut DemuxContext<'_>, req: SeekRequest) -> Result<SeekOutcome> {
        let region = *ctx.region;
        let unit = self.packet_size as u64;
        let duration = (self.duration > 0.0).then_some(self.duration);

        let indexed = match (&self.simple_index, req.flags.factor) {
            (Some(index), false) => req.target_time(self.last_pts, duration).and_then(|t| {
                let packet = index.packet_for(t * 1000.0 + self.preroll_ms)?;
                let clamped = duration.map(|d| t > d).unwrap_or(false);
                Some((region.start + packet as u64 * unit, clamped))
            }),
            _ => None,
        };
        let target = match indexed {
            Some(t) => Some(t),
            None => req.target_offset(region, ctx.source.tell(), self.bytes_per_sec),
        };
        let Some((offset, clamped)) = target else {
            warn!("asf: no bitrate and no index, seeking unavailable");
            return Ok(SeekOutcome::Unsupported);
        };

        let mut pos = align_down(region, region.clamp(offset), unit);
        if region.end != u64::MAX && pos + unit > region.end {
            pos = align_down(region, region.end.saturating_sub(unit), unit);
        }
        self.reset_reassembly();
        ctx.source.seek(pos)?;
        debug!("asf: seek to packet {} (offset {})", (pos - region.start) / unit.max(1), pos);
        Ok(SeekOutcome::Moved { pos, clamped })
    }

    fn control(&mut self, ctx: &mut DemuxContext<'_>, query: Query) -> QueryAnswer {
        match query {
            Query::Duration if self.duration > 0.0 => QueryAnswer::Value(self.duration),
            Query::Duration => QueryAnswer::DontKnow,
            Query::PercentPosition => percent_of(*ctx.region, ctx.source.tell()),
        }
    }

    fn close(&mut self) {
        self.reset_reassembly();
        self.tracks.clear();
    }
}
