//! Id RoQ: a run of little-endian chunks. Video frames are a vector
//! quantization chunk, optionally preceded by a codebook chunk that is
//! delivered with it; audio chunks are DPCM, mono or stereo, at 22050 Hz.

use super::samples::{sample_tag, Sample, SampleTable};
use super::{percent_of, DemuxContext, Fill, FormatDemuxer, FormatDriver, Probe, Query, QueryAnswer};
use crate::av::{AudioParams, CodecTag, Packet, Stream, StreamKind, TimeBase, VideoParams};
use crate::error::{DemuxError, Result};
use crate::index::ChunkIndex;
use crate::io::{ByteSource, ByteSourceExt, DataRegion};
use crate::seek::{SeekOutcome, SeekRequest};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, info, trace, warn};

const CHUNK_HEADER: usize = 8;
const SIGNATURE: u16 = 0x1084;
const INFO: u16 = 0x1001;
const CODEBOOK: u16 = 0x1002;
const VQ: u16 = 0x1011;
const SOUND_MONO: u16 = 0x1020;
const SOUND_STEREO: u16 = 0x1021;

const AUDIO_RATE: u32 = 22050;
const DEFAULT_FPS: u32 = 30;
const MAX_CHUNK: u32 = 16 << 20;

const VIDEO_ID: u32 = 0;
const AUDIO_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkHeader {
    id: u16,
    len: u32,
    arg: u16,
}

impl ChunkHeader {
    fn parse(mut raw: &[u8]) -> Self {
        Self {
            id: raw.get_u16_le(),
            len: raw.get_u32_le(),
            arg: raw.get_u16_le(),
        }
    }
}

/// Whether the source starts with a RoQ signature chunk.
fn has_signature(head: &[u8]) -> bool {
    head.len() >= CHUNK_HEADER && {
        let h = ChunkHeader::parse(head);
        h.id == SIGNATURE && h.len == u32::MAX
    }
}

/// A sample found by the scanner, with its bytes when they were kept.
struct Unit {
    sample: Sample,
    data: Option<Bytes>,
}

/// Codebook chunk waiting for the frame it belongs to.
struct PendingCodebook {
    offset: u64,
    len: u32,
    data: BytesMut,
}

/// Walks chunks in file order, pairing codebooks with frames and timing
/// frames and audio.
struct Scanner {
    fps: u32,
    frame: u64,
    audio_samples: u64,
    codebook: Option<PendingCodebook>,
    width: u32,
    height: u32,
    channels: Option<u16>,
    skipped: u64,
}

impl Scanner {
    fn new(fps: u32) -> Self {
        Self {
            fps,
            frame: 0,
            audio_samples: 0,
            codebook: None,
            width: 0,
            height: 0,
            channels: None,
            skipped: 0,
        }
    }

    fn reset_clock(&mut self, frame: u64, audio_samples: u64) {
        self.frame = frame;
        self.audio_samples = audio_samples;
        self.codebook = None;
    }

    /// Next video frame or audio chunk. With `keep` the chunk bytes are read
    /// and returned, otherwise they are skipped.
    fn next_unit(&mut self, src: &mut dyn ByteSource, keep: bool) -> Result<Option<Unit>> {
        loop {
            let pos = src.tell();
            let raw = match src.read_bytes(CHUNK_HEADER) {
                Ok(raw) => raw,
                Err(DemuxError::ShortRead { .. }) => return Ok(None),
                Err(e) => return Err(e),
            };
            let header = ChunkHeader::parse(&raw);
            if header.len > MAX_CHUNK {
                warn!("roq: chunk {:04x} at {} claims {} bytes", header.id, pos, header.len);
                return Ok(None);
            }
            let total = CHUNK_HEADER as u32 + header.len;
            let body = if keep || header.id == INFO {
                Some(src.read_bytes(header.len as usize)?)
            } else {
                src.skip(header.len as u64)?;
                None
            };
            trace!("roq: chunk {:04x} at {}, {} bytes", header.id, pos, header.len);

            match header.id {
                INFO => {
                    if let Some(mut b) = body.filter(|b| b.len() >= 4) {
                        self.width = b.get_u16_le() as u32;
                        self.height = b.get_u16_le() as u32;
                    }
                }
                CODEBOOK => {
                    if self.codebook.is_some() {
                        debug!("roq: codebook at {} replaces an unused one", pos);
                    }
                    let mut data = BytesMut::new();
                    if let Some(body) = body {
                        data.extend_from_slice(&raw);
                        data.extend_from_slice(&body);
                    }
                    self.codebook = Some(PendingCodebook { offset: pos, len: total, data });
                }
                VQ => {
                    let (offset, len, mut data, key) = match self.codebook.take() {
                        Some(cb) if cb.offset + cb.len as u64 == pos => {
                            (cb.offset, cb.len + total, cb.data, true)
                        }
                        Some(_) => {
                            debug!("roq: codebook not adjacent to frame at {}, dropped", pos);
                            self.skipped += 1;
                            (pos, total, BytesMut::new(), false)
                        }
                        None => (pos, total, BytesMut::new(), false),
                    };
                    let key = key || self.frame == 0;
                    if let Some(body) = body {
                        data.extend_from_slice(&raw);
                        data.extend_from_slice(&body);
                    }
                    let pts = self.frame as f64 / self.fps as f64;
                    self.frame += 1;
                    return Ok(Some(Unit {
                        sample: Sample { tag: sample_tag(VIDEO_ID, true), offset, len, pts, key },
                        data: keep.then(|| data.freeze()),
                    }));
                }
                SOUND_MONO | SOUND_STEREO => {
                    let channels = if header.id == SOUND_MONO { 1 } else { 2 };
                    self.channels.get_or_insert(channels);
                    let pts = self.audio_samples as f64 / AUDIO_RATE as f64;
                    self.audio_samples += header.len as u64 / channels as u64;
                    let data = body.map(|body| {
                        let mut data = BytesMut::with_capacity(total as usize);
                        data.extend_from_slice(&raw);
                        data.extend_from_slice(&body);
                        data.freeze()
                    });
                    return Ok(Some(Unit {
                        sample: Sample {
                            tag: sample_tag(AUDIO_ID, false),
                            offset: pos,
                            len: total,
                            pts,
                            key: true,
                        },
                        data,
                    }));
                }
                other => {
                    trace!("roq: unknown chunk {:04x} at {} skipped (arg {})", other, pos, header.arg);
                    self.skipped += 1;
                }
            }
        }
    }
}

/// Audio layout read from the chunk headers inside `window`.
fn peek_channels(window: &[u8]) -> Option<u16> {
    let mut at = 0;
    while at + CHUNK_HEADER <= window.len() {
        let header = ChunkHeader::parse(&window[at..]);
        match header.id {
            SOUND_MONO => return Some(1),
            SOUND_STEREO => return Some(2),
            _ => at += CHUNK_HEADER + header.len as usize,
        }
    }
    None
}

enum Mode {
    /// Every chunk located at open.
    Indexed(SampleTable),
    /// Forward-only source, chunks read as they come.
    Linear(Scanner),
}

pub struct RoqDemuxer {
    mode: Mode,
    duration: Option<f64>,
}

impl RoqDemuxer {
    pub fn open(ctx: &mut DemuxContext<'_>) -> Result<Self> {
        let raw = ctx.source.read_bytes(CHUNK_HEADER)?;
        if !has_signature(&raw) {
            return Err(DemuxError::HeaderMalformed("missing RoQ signature".into()));
        }
        let fps = match ChunkHeader::parse(&raw).arg as u32 {
            0 => DEFAULT_FPS,
            fps => fps,
        };
        let start = ctx.source.tell();
        *ctx.region = DataRegion::new(start, ctx.source.len().unwrap_or(u64::MAX));
        let mut scanner = Scanner::new(fps);

        let (mode, duration) = if ctx.source.is_seekable() {
            let mut samples = Vec::new();
            while let Some(unit) = scanner.next_unit(ctx.source, false)? {
                samples.push(unit.sample);
            }
            ctx.diag.skipped_records += scanner.skipped;
            let table = SampleTable::new(samples, *ctx.region, Some(VIDEO_ID));
            let duration = table.max_pts();
            ctx.source.seek(start)?;
            info!(
                "roq: {} frames at {} fps, {} audio chunks",
                scanner.frame,
                fps,
                table.samples().len() as u64 - scanner.frame
            );
            (Mode::Indexed(table), duration)
        } else {
            let window = ctx.source.peek(ctx.config.probe_size)?;
            scanner.channels = peek_channels(window);
            if window.len() >= CHUNK_HEADER + 4 && ChunkHeader::parse(window).id == INFO {
                let mut info = &window[CHUNK_HEADER..];
                scanner.width = info.get_u16_le() as u32;
                scanner.height = info.get_u16_le() as u32;
            }
            (Mode::Linear(Scanner::new(fps)), None)
        };

        ctx.streams.add(
            Stream::new(VIDEO_ID, StreamKind::Video, CodecTag::Named("roq"))
                .with_time_base(TimeBase::new(1, fps))
                .with_video(VideoParams {
                    width: scanner.width,
                    height: scanner.height,
                    fps: Some(fps as f64),
                }),
        )?;
        if let Some(channels) = scanner.channels {
            ctx.streams.add(
                Stream::new(AUDIO_ID, StreamKind::Audio, CodecTag::Named("roq_dpcm"))
                    .with_time_base(TimeBase::new(1, AUDIO_RATE))
                    .with_audio(AudioParams {
                        channels,
                        sample_rate: AUDIO_RATE,
                        bits_per_sample: 16,
                        ..Default::default()
                    }),
            )?;
        }
        Ok(Self { mode, duration })
    }

    fn fill_linear(scanner: &mut Scanner, ctx: &mut DemuxContext<'_>) -> Result<Fill> {
        loop {
            let skipped = scanner.skipped;
            let unit = scanner.next_unit(ctx.source, true)?;
            ctx.diag.skipped_records += scanner.skipped - skipped;
            let Some(Unit { sample, data: Some(data) }) = unit else {
                return Ok(Fill::EndOfData);
            };
            let Some(number) = sample.stream() else {
                continue;
            };
            let packet = Packet::new(data)
                .with_stream_id(number)
                .with_pts(sample.pts)
                .with_pos(sample.offset)
                .with_key_flag(sample.key);
            if ctx.streams.push(packet) {
                return Ok(Fill::Filled);
            }
        }
    }
}

impl FormatDemuxer for RoqDemuxer {
    fn fill_buffer(&mut self, ctx: &mut DemuxContext<'_>, _wanted: Option<u32>) -> Result<Fill> {
        match &mut self.mode {
            Mode::Indexed(table) => table.fill(ctx),
            Mode::Linear(scanner) => Self::fill_linear(scanner, ctx),
        }
    }

    fn seek(&mut self, ctx: &mut DemuxContext<'_>, req: SeekRequest) -> Result<SeekOutcome> {
        let current = ctx
            .streams
            .get(VIDEO_ID)
            .and_then(|s| s.last_pts())
            .unwrap_or(0.0);
        match &mut self.mode {
            Mode::Indexed(table) => table.seek(ctx, req, current, self.duration),
            Mode::Linear(_) => Ok(SeekOutcome::Unsupported),
        }
    }

    fn control(&mut self, ctx: &mut DemuxContext<'_>, query: Query) -> QueryAnswer {
        match query {
            Query::Duration => self.duration.map(QueryAnswer::Value).unwrap_or(QueryAnswer::DontKnow),
            Query::PercentPosition => percent_of(*ctx.region, ctx.source.tell()),
        }
    }

    fn chunk_index(&self) -> Option<&ChunkIndex> {
        match &self.mode {
            Mode::Indexed(table) => Some(table.index()),
            Mode::Linear(_) => None,
        }
    }

    fn close(&mut self) {
        match &mut self.mode {
            Mode::Indexed(table) => table.rewind(),
            Mode::Linear(scanner) => scanner.reset_clock(0, 0),
        }
    }
}

pub struct RoqDriver;

impl FormatDriver for RoqDriver {
    fn name(&self) -> &'static str {
        "roq"
    }

    fn probe(&self, source: &mut dyn ByteSource, _probe_size: usize) -> Result<Probe> {
        Ok(if has_signature(source.peek(CHUNK_HEADER)?) {
            Probe::Definite
        } else {
            Probe::No
        })
    }

    fn open(&self, ctx: &mut DemuxContext<'_>) -> Result<Box<dyn FormatDemuxer>> {
        Ok(Box::new(RoqDemuxer::open(ctx)?))
    }
}
