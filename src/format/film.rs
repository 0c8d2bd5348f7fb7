//! Sega FILM (`.cpk`, `.film`): a `FDSC` stream description and a `STAB`
//! sample table in the header, then the sample data.

use super::samples::{sample_tag, Sample, SampleTable};
use super::{percent_of, DemuxContext, Fill, FormatDemuxer, FormatDriver, Probe, Query, QueryAnswer};
use crate::av::{AudioParams, CodecTag, FourCC, Stream, StreamKind, TimeBase, VideoParams};
use crate::error::{DemuxError, Result};
use crate::index::ChunkIndex;
use crate::io::{ByteSource, ByteSourceExt, DataRegion};
use crate::seek::{SeekOutcome, SeekRequest};
use bytes::Buf;
use log::{debug, info, warn};

const FILM_TAG: &[u8; 4] = b"FILM";
const FDSC_TAG: &[u8; 4] = b"FDSC";
const STAB_TAG: &[u8; 4] = b"STAB";
/// Sample pts word marking an audio sample.
const AUDIO_SAMPLE: u32 = 0xffff_ffff;
/// Set in a video pts word for frames that are not keyframes.
const NOT_KEY: u32 = 0x8000_0000;
/// ADX frames hold 32 samples per channel in 18 bytes.
const ADX_FRAME: (u64, u64) = (18, 32);
const MAX_SAMPLES: u32 = 1 << 20;

const VIDEO_ID: u32 = 0;
const AUDIO_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
enum AudioCoding {
    Pcm,
    Adx,
}

#[derive(Debug, Clone, Copy)]
struct AudioDesc {
    channels: u16,
    bits: u16,
    rate: u32,
    coding: AudioCoding,
}

impl AudioDesc {
    /// Samples per channel carried by `bytes` of audio data.
    fn samples_in(&self, bytes: u64) -> u64 {
        let channels = self.channels.max(1) as u64;
        match self.coding {
            AudioCoding::Adx => bytes / ADX_FRAME.0 / channels * ADX_FRAME.1,
            AudioCoding::Pcm => bytes / (channels * (self.bits as u64 / 8).max(1)),
        }
    }

    fn codec(&self) -> CodecTag {
        match (self.coding, self.bits) {
            (AudioCoding::Adx, _) => CodecTag::Named("adpcm_adx"),
            (AudioCoding::Pcm, 8) => CodecTag::Named("pcm_s8_planar"),
            _ => CodecTag::Named("pcm_s16be_planar"),
        }
    }
}

/// Stream description from the `FDSC` chunk.
#[derive(Debug, Clone)]
struct Description {
    video: FourCC,
    width: u32,
    height: u32,
    audio: Option<AudioDesc>,
}

fn parse_fdsc(mut body: &[u8]) -> Result<Description> {
    if body.len() < 12 {
        return Err(DemuxError::HeaderMalformed("FDSC chunk too short".into()));
    }
    let mut video = [0u8; 4];
    body.copy_to_slice(&mut video);
    let height = body.get_u32();
    let width = body.get_u32();
    let audio = if body.len() >= 6 {
        let _depth = body.get_u8();
        let channels = body.get_u8() as u16;
        let bits = body.get_u8() as u16;
        let compression = body.get_u8();
        let rate = body.get_u16() as u32;
        (channels > 0 && rate > 0).then_some(AudioDesc {
            channels,
            bits,
            rate,
            coding: if compression == 2 { AudioCoding::Adx } else { AudioCoding::Pcm },
        })
    } else {
        None
    };
    Ok(Description {
        video: FourCC(video),
        width,
        height,
        audio,
    })
}

/// Reads a chunk header and checks its tag. Returns the body length.
fn expect_chunk(src: &mut dyn ByteSource, tag: &[u8; 4]) -> Result<usize> {
    let found = src.read_fourcc()?;
    if found.0 != *tag {
        return Err(DemuxError::HeaderMalformed(format!(
            "expected {} chunk, found {}",
            FourCC(*tag),
            found
        )));
    }
    let len = src.read_u32_be()? as usize;
    len.checked_sub(8)
        .ok_or_else(|| DemuxError::HeaderMalformed(format!("{} chunk size {}", found, len)))
}

pub struct FilmDemuxer {
    table: SampleTable,
    duration: Option<f64>,
}

impl FilmDemuxer {
    pub fn open(ctx: &mut DemuxContext<'_>) -> Result<Self> {
        let src = &mut *ctx.source;
        if src.read_fourcc()?.0 != *FILM_TAG {
            return Err(DemuxError::HeaderMalformed("missing FILM signature".into()));
        }
        let data_start = src.read_u32_be()? as u64;
        let version = src.read_fourcc()?;
        src.skip(4)?;

        let fdsc_len = expect_chunk(src, FDSC_TAG)?;
        let desc = parse_fdsc(&src.read_bytes(fdsc_len)?)?;

        expect_chunk(src, STAB_TAG)?;
        let base_clock = src.read_u32_be()?;
        let count = src.read_u32_be()?;
        if base_clock == 0 {
            return Err(DemuxError::HeaderMalformed("zero FILM base clock".into()));
        }
        if count > MAX_SAMPLES {
            return Err(DemuxError::HeaderMalformed(format!("{} FILM samples", count)));
        }
        info!(
            "film: version {}, {} {}x{}, {} samples at {} Hz",
            version, desc.video, desc.width, desc.height, count, base_clock
        );

        let video_tag = sample_tag(VIDEO_ID, true);
        let audio_tag = sample_tag(AUDIO_ID, false);
        let mut samples = Vec::with_capacity(count as usize);
        let mut audio_bytes = 0u64;
        for _ in 0..count {
            let offset = src.read_u32_be()? as u64 + data_start;
            let len = src.read_u32_be()?;
            let word = src.read_u32_be()?;
            src.skip(4)?;
            if word == AUDIO_SAMPLE {
                let Some(audio) = desc.audio else {
                    debug!("film: audio sample at {} without an audio stream", offset);
                    continue;
                };
                let pts = audio.samples_in(audio_bytes) as f64 / audio.rate as f64;
                audio_bytes += len as u64;
                samples.push(Sample { tag: audio_tag, offset, len, pts, key: true });
            } else {
                let pts = (word & !NOT_KEY) as f64 / base_clock as f64;
                samples.push(Sample { tag: video_tag, offset, len, pts, key: word & NOT_KEY == 0 });
            }
        }

        ctx.streams.add(
            Stream::new(VIDEO_ID, StreamKind::Video, CodecTag::FourCC(desc.video))
                .with_time_base(TimeBase::new(1, base_clock))
                .with_video(VideoParams {
                    width: desc.width,
                    height: desc.height,
                    fps: None,
                }),
        )?;
        if let Some(audio) = desc.audio {
            ctx.streams.add(
                Stream::new(AUDIO_ID, StreamKind::Audio, audio.codec())
                    .with_time_base(TimeBase::new(1, audio.rate))
                    .with_audio(AudioParams {
                        channels: audio.channels,
                        sample_rate: audio.rate,
                        bits_per_sample: audio.bits,
                        ..Default::default()
                    }),
            )?;
        }

        *ctx.region = DataRegion::new(data_start, ctx.source.len().unwrap_or(u64::MAX));
        let table = SampleTable::new(samples, *ctx.region, Some(VIDEO_ID));
        if table.samples().len() < count as usize {
            warn!("film: {} of {} samples usable", table.samples().len(), count);
        }
        let duration = table.max_pts();
        ctx.source.seek(data_start)?;
        Ok(Self { table, duration })
    }
}

impl FormatDemuxer for FilmDemuxer {
    fn fill_buffer(&mut self, ctx: &mut DemuxContext<'_>, _wanted: Option<u32>) -> Result<Fill> {
        self.table.fill(ctx)
    }

    fn seek(&mut self, ctx: &mut DemuxContext<'_>, req: SeekRequest) -> Result<SeekOutcome> {
        let current = ctx
            .streams
            .get(VIDEO_ID)
            .and_then(|s| s.last_pts())
            .unwrap_or(0.0);
        self.table.seek(ctx, req, current, self.duration)
    }

    fn control(&mut self, ctx: &mut DemuxContext<'_>, query: Query) -> QueryAnswer {
        match query {
            Query::Duration => self.duration.map(QueryAnswer::Value).unwrap_or(QueryAnswer::DontKnow),
            Query::PercentPosition => percent_of(*ctx.region, ctx.source.tell()),
        }
    }

    fn chunk_index(&self) -> Option<&ChunkIndex> {
        Some(self.table.index())
    }

    fn close(&mut self) {
        self.table.rewind();
    }
}

pub struct FilmDriver;

impl FormatDriver for FilmDriver {
    fn name(&self) -> &'static str {
        "film"
    }

    fn probe(&self, source: &mut dyn ByteSource, _probe_size: usize) -> Result<Probe> {
        Ok(if source.peek(4)? == FILM_TAG {
            Probe::Definite
        } else {
            Probe::No
        })
    }

    fn open(&self, ctx: &mut DemuxContext<'_>) -> Result<Box<dyn FormatDemuxer>> {
        Ok(Box::new(FilmDemuxer::open(ctx)?))
    }
}
