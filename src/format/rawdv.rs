//! Raw DV: back-to-back DIF frames of a fixed size per system. Each frame is
//! handed to the video stream and, with the audio it embeds, to the audio
//! stream.

use super::{percent_of, DemuxContext, Fill, FormatDemuxer, FormatDriver, Probe, Query, QueryAnswer};
use crate::av::{AudioParams, CodecTag, FourCC, Packet, Stream, StreamKind, TimeBase, VideoParams};
use crate::error::{DemuxError, Result};
use crate::io::{ByteSource, ByteSourceExt, DataRegion};
use crate::seek::{ResyncPolicy, SeekOutcome, SeekRequest};
use log::{debug, info, warn};

const VIDEO_ID: u32 = 0;
const AUDIO_ID: u32 = 1;

/// DIF header block signature, with the 50 Hz flag masked out.
const HEADER_SIGNATURE: [u8; 4] = [0x1f, 0x07, 0x00, 0x3f];
const SYSTEM_50HZ: u8 = 0x80;
const DIF_BLOCK: usize = 80;
/// Absorbs rounding when a time lands exactly on a frame.
const FRAME_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvSystem {
    /// 525 lines, 29.97 frames per second.
    Ntsc,
    /// 625 lines, 25 frames per second.
    Pal,
}

impl DvSystem {
    pub fn frame_size(self) -> usize {
        match self {
            DvSystem::Ntsc => 120_000,
            DvSystem::Pal => 144_000,
        }
    }

    pub fn time_base(self) -> TimeBase {
        match self {
            DvSystem::Ntsc => TimeBase::new(1001, 30000),
            DvSystem::Pal => TimeBase::new(1, 25),
        }
    }

    fn height(self) -> u32 {
        match self {
            DvSystem::Ntsc => 480,
            DvSystem::Pal => 576,
        }
    }
}

/// System of the DIF header block at the start of `head`.
pub fn header_system(head: &[u8]) -> Option<DvSystem> {
    let sig = head.get(..4)?;
    if sig[..3] != HEADER_SIGNATURE[..3] || sig[3] & !SYSTEM_50HZ != HEADER_SIGNATURE[3] {
        return None;
    }
    Some(if sig[3] & SYSTEM_50HZ != 0 {
        DvSystem::Pal
    } else {
        DvSystem::Ntsc
    })
}

pub struct RawDvDemuxer {
    system: DvSystem,
    frame_size: u64,
    /// Number of the next frame to read.
    frame: u64,
    /// Whole frames in the file, when its length is known.
    frames: Option<u64>,
}

impl RawDvDemuxer {
    pub fn open(ctx: &mut DemuxContext<'_>) -> Result<Self> {
        let start = ctx.source.tell();
        let system = header_system(ctx.source.peek(4)?)
            .ok_or_else(|| DemuxError::HeaderMalformed("no DIF header block".into()))?;
        let frame_size = system.frame_size() as u64;
        let end = ctx.source.len().unwrap_or(u64::MAX);
        *ctx.region = DataRegion::new(start, end);
        let frames = ctx.source.len().map(|len| len.saturating_sub(start) / frame_size);
        info!("rawdv: {:?}, {:?} frames", system, frames);

        let time_base = system.time_base();
        ctx.streams.add(
            Stream::new(VIDEO_ID, StreamKind::Video, CodecTag::FourCC(FourCC::new(b"dvsd")))
                .with_time_base(time_base)
                .with_video(VideoParams {
                    width: 720,
                    height: system.height(),
                    fps: Some(time_base.units_per_second()),
                }),
        )?;
        ctx.streams.add(
            Stream::new(AUDIO_ID, StreamKind::Audio, CodecTag::Named("dv_audio"))
                .with_time_base(time_base)
                .with_audio(AudioParams {
                    channels: 2,
                    sample_rate: 48000,
                    bits_per_sample: 16,
                    block_align: 4,
                    avg_bytes_per_sec: 192_000,
                }),
        )?;
        Ok(Self {
            system,
            frame_size,
            frame: 0,
            frames,
        })
    }

    fn duration(&self) -> Option<f64> {
        self.frames
            .map(|n| self.system.time_base().to_seconds(n as f64))
    }
}

impl FormatDemuxer for RawDvDemuxer {
    fn fill_buffer(&mut self, ctx: &mut DemuxContext<'_>, _wanted: Option<u32>) -> Result<Fill> {
        loop {
            let pos = ctx.source.tell();
            let data = match ctx.source.read_bytes(self.frame_size as usize) {
                Ok(data) => data,
                Err(DemuxError::ShortRead { got, .. }) => {
                    if got > 0 {
                        debug!("rawdv: {} trailing bytes at {} dropped", got, pos);
                        ctx.diag.skipped_records += 1;
                    }
                    return Ok(Fill::EndOfData);
                }
                Err(e) => return Err(e),
            };
            let intact = header_system(&data) == Some(self.system);
            if !intact {
                warn!("rawdv: frame {} at {} has no DIF header", self.frame, pos);
                ctx.diag.skipped_records += 1;
            }
            let pts = self.system.time_base().to_seconds(self.frame as f64);
            self.frame += 1;

            let mut pushed = false;
            for id in [VIDEO_ID, AUDIO_ID] {
                let packet = Packet::new(data.clone())
                    .with_stream_id(id)
                    .with_pts(pts)
                    .with_pos(pos)
                    .with_key_flag(true)
                    .with_corrupt_flag(!intact);
                pushed |= ctx.streams.push(packet);
            }
            if pushed {
                return Ok(Fill::Filled);
            }
        }
    }

    fn seek(&mut self, ctx: &mut DemuxContext<'_>, req: SeekRequest) -> Result<SeekOutcome> {
        let time_base = self.system.time_base();
        let current = time_base.to_seconds(self.frame as f64);
        let Some(target) = req.target_time(current, self.duration()) else {
            return Ok(SeekOutcome::Unsupported);
        };
        let wanted = (target * time_base.units_per_second() + FRAME_EPSILON).floor() as u64;
        let last = self.frames.map(|n| n.saturating_sub(1));
        let frame = last.map(|l| wanted.min(l)).unwrap_or(wanted);
        let clamped = last.map(|l| wanted > l).unwrap_or(false) || (req.amount < 0.0 && target <= 0.0);

        self.frame = frame;
        let pos = ctx.region.start + frame * self.frame_size;
        ctx.source.seek(pos)?;
        debug!("rawdv: seek to frame {} at {}", frame, pos);
        Ok(SeekOutcome::Moved { pos, clamped })
    }

    // every frame is a keyframe carrying its own audio
    fn resync_policy(&self) -> ResyncPolicy {
        ResyncPolicy::None
    }

    fn control(&mut self, ctx: &mut DemuxContext<'_>, query: Query) -> QueryAnswer {
        match query {
            Query::Duration => self.duration().map(QueryAnswer::Value).unwrap_or(QueryAnswer::DontKnow),
            Query::PercentPosition => percent_of(*ctx.region, ctx.source.tell()),
        }
    }
}

pub struct RawDvDriver;

impl FormatDriver for RawDvDriver {
    fn name(&self) -> &'static str {
        "rawdv"
    }

    /// Certain on a DIF header at the start; unsure when one sits on a DIF
    /// block boundary further in.
    fn probe(&self, source: &mut dyn ByteSource, probe_size: usize) -> Result<Probe> {
        let window = source.peek(probe_size)?;
        if header_system(window).is_some() {
            return Ok(Probe::Definite);
        }
        let found = window
            .chunks(DIF_BLOCK)
            .skip(1)
            .any(|block| header_system(block).is_some());
        Ok(if found { Probe::Low } else { Probe::No })
    }

    fn open(&self, ctx: &mut DemuxContext<'_>) -> Result<Box<dyn FormatDemuxer>> {
        if header_system(ctx.source.peek(4)?).is_none() {
            sync_to_header(ctx.source)?;
        }
        Ok(Box::new(RawDvDemuxer::open(ctx)?))
    }
}

/// Skips whole DIF blocks up to the next header block.
fn sync_to_header(src: &mut dyn ByteSource) -> Result<()> {
    let window = src.peek(DIF_BLOCK * 1500)?;
    let skip = window
        .chunks(DIF_BLOCK)
        .position(|block| header_system(block).is_some())
        .map(|blocks| (blocks * DIF_BLOCK) as u64);
    match skip {
        Some(skip) => src.skip(skip),
        None => Err(DemuxError::HeaderMalformed("no DIF header block".into())),
    }
}
