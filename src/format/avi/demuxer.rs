use super::header::{self, AviHeader, StreamFormat, StreamList, WaveFormat, JUNK, LIST, RIFF};
use super::{choose_chunk_len, odml, recover, valid_fourcc, valid_stream_id};
use crate::av::{
    AudioParams, CodecTag, FourCC, Packet, Stream, StreamKind, TimeBase, VideoParams,
};
use crate::codec::{KeyframeRule, KEYFRAME_PROBE_BYTES};
use crate::config::IndexMode;
use crate::error::{DemuxError, Result};
use crate::format::{percent_of, DemuxContext, Fill, FormatDemuxer, Query, QueryAnswer};
use crate::index::{sidefile, stream_number, ChunkIndex, IndexEntry, AVIIF_LIST};
use crate::io::{ByteSourceExt, DataRegion};
use crate::seek::{ResyncPolicy, SeekOutcome, SeekRequest};
use log::{debug, info, trace, warn};

/// First audio and video records further apart than this mean the file is
/// not interleaved.
const NI_DISTANCE: u64 = 0x10_0000;
/// Upper bound on a foreign record skipped while reading without an index.
const MAX_FOREIGN_SKIP: u64 = 65536;
/// Index and header lengths both above this are not trusted.
const MAX_TRUSTED_LEN: u32 = 0x20_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    /// Records are read in file order.
    Interleaved,
    /// Each stream walks the index through its own cursor.
    NonInterleaved,
    /// Each stream walks the file through its own cursor.
    NonInterleavedNoIndex,
}

/// Read state of one stream.
#[derive(Debug, Clone)]
struct Track {
    number: u32,
    kind: StreamKind,
    scale: u32,
    rate: u32,
    sample_size: u32,
    block_size: u32,
    header_length: u32,
    rule: KeyframeRule,
    /// Records read so far.
    packs: u64,
    /// Audio blocks read so far.
    blocks: u64,
    /// Next index position (non-interleaved).
    cursor: usize,
    /// Next file position (non-interleaved without index).
    file_cursor: u64,
    /// Records still to be read and dropped after a seek.
    skip_chunks: u64,
    /// Bytes to cut from the head of the next record, with the timestamp
    /// of the first byte kept.
    trim: Option<(u32, f64)>,
}

impl Track {
    fn from_list(list: &StreamList) -> Option<Self> {
        let kind = match list.header.fcc_type {
            header::VIDS | header::IAVS => StreamKind::Video,
            header::AUDS => StreamKind::Audio,
            header::TXTS => StreamKind::Subtitle,
            other => {
                debug!("avi: stream {} of type {} ignored", list.number, other);
                return None;
            }
        };
        let rule = match &list.format {
            StreamFormat::Video(bih) => KeyframeRule::for_fourcc(bih.compression),
            _ => KeyframeRule::Always,
        };
        Some(Self {
            number: list.number,
            kind,
            scale: list.header.scale,
            rate: list.header.rate,
            sample_size: list.header.sample_size,
            block_size: block_size(list),
            header_length: list.header.length,
            rule,
            packs: 0,
            blocks: 0,
            cursor: 0,
            file_cursor: 0,
            skip_chunks: 0,
            trim: None,
        })
    }

    fn time_base(&self) -> TimeBase {
        TimeBase::new(self.scale, self.rate)
    }

    fn blocks_in(&self, len: u32) -> u64 {
        (len as u64).div_ceil(self.block_size.max(1) as u64)
    }

    /// Timestamp of the next record.
    fn next_pts(&self, from_bytes: bool) -> f64 {
        match self.kind {
            StreamKind::Audio if from_bytes => self.time_base().to_seconds(self.blocks as f64),
            _ => self.time_base().to_seconds(self.packs as f64),
        }
    }

    fn advance(&mut self, len: u32) {
        self.packs += 1;
        self.blocks += self.blocks_in(len);
    }

    fn reset_counters(&mut self) {
        self.packs = 0;
        self.blocks = 0;
        self.skip_chunks = 0;
        self.trim = None;
    }

    fn is_cbr_audio(&self) -> bool {
        self.kind == StreamKind::Audio && self.sample_size != 0
    }
}

/// Audio block size used to count timestamp units.
fn block_size(list: &StreamList) -> u32 {
    let StreamFormat::Audio(wf) = &list.format else {
        return list.header.sample_size.max(1);
    };
    let strh = &list.header;
    if strh.sample_size == 1
        && strh.scale == 1
        && (wf.block_align == 1152 || wf.block_align == 576)
    {
        // mencoder writes MP3 this way; the header lies about the block size
        return 1;
    }
    if wf.block_align != 0 {
        return wf.block_align as u32;
    }
    if wf.format_tag == WaveFormat::PCM {
        return (wf.channels as u32 * (wf.bits_per_sample as u32 / 8)).max(1);
    }
    1
}

fn register(ctx: &mut DemuxContext<'_>, list: &StreamList, main: &header::MainHeader) -> Result<()> {
    let strh = &list.header;
    let time_base = TimeBase::new(strh.scale, strh.rate);
    let stream = match &list.format {
        StreamFormat::Video(bih) => {
            let tag = if bih.compression.0 == [0; 4] {
                strh.fcc_handler
            } else {
                bih.compression
            };
            Stream::new(list.number, StreamKind::Video, CodecTag::FourCC(tag)).with_video(
                VideoParams {
                    width: bih.width.unsigned_abs(),
                    height: bih.height.unsigned_abs(),
                    fps: (strh.fps() > 0.0).then(|| strh.fps()),
                },
            )
        }
        StreamFormat::Audio(wf) => Stream::new(list.number, StreamKind::Audio, CodecTag::Wave(wf.format_tag))
            .with_audio(AudioParams {
                channels: wf.channels,
                sample_rate: wf.samples_per_sec,
                bits_per_sample: wf.bits_per_sample,
                block_align: wf.block_align,
                avg_bytes_per_sec: wf.avg_bytes_per_sec,
            }),
        StreamFormat::Other if strh.fcc_type == header::TXTS => {
            Stream::new(list.number, StreamKind::Subtitle, CodecTag::FourCC(strh.fcc_handler))
        }
        StreamFormat::Other if strh.fcc_type == header::VIDS || strh.fcc_type == header::IAVS => {
            Stream::new(list.number, StreamKind::Video, CodecTag::FourCC(strh.fcc_handler))
                .with_video(VideoParams {
                    width: main.width,
                    height: main.height,
                    fps: (strh.fps() > 0.0).then(|| strh.fps()),
                })
        }
        StreamFormat::Other => {
            return Err(DemuxError::HeaderMalformed(format!(
                "audio stream {} without strf",
                list.number
            )))
        }
    };
    let mut stream = stream
        .with_time_base(time_base)
        .with_extra_data(list.extra.clone());
    stream.name = list.name.clone();
    ctx.streams.add(stream)
}

/// Converts `idx1` records to absolute entries. Offsets are relative to the
/// `movi` list type unless the first two already point into the data.
fn idx1_entries(header: &AviHeader) -> Vec<IndexEntry> {
    let relative = header.idx1.len() > 1
        && !header.is_odml
        && header.idx1[..2]
            .iter()
            .any(|e| (e.offset as u64) < header.movi_start);
    let base = if relative {
        header.movi_start.saturating_sub(4)
    } else {
        0
    };
    header
        .idx1
        .iter()
        .filter(|e| e.flags & AVIIF_LIST == 0 || valid_stream_id(e.ckid))
        .map(|e| IndexEntry::new(e.ckid, base + e.offset as u64, e.len, e.flags))
        .collect()
}

/// Per-stream state of the demuxer for one RIFF `AVI ` file.
pub struct AviDemuxer {
    tracks: Vec<Track>,
    index: Option<ChunkIndex>,
    /// Next index position (interleaved with index).
    idx_pos: usize,
    mode: ReadMode,
    video: Option<u32>,
    /// Video frames in the file.
    frames: u64,
    header_frames: u32,
    pts_from_bytes: bool,
    index_mode: IndexMode,
}

impl AviDemuxer {
    pub fn open(ctx: &mut DemuxContext<'_>) -> Result<Self> {
        let header = header::read_header(ctx.source)?;
        info!(
            "avi: {} streams, {}x{}, {} frames, odml={}",
            header.streams.len(),
            header.main.width,
            header.main.height,
            header.main.total_frames,
            header.is_odml
        );

        let mut tracks = Vec::new();
        for list in &header.streams {
            let Some(track) = Track::from_list(list) else {
                continue;
            };
            register(ctx, list, &header.main)?;
            tracks.push(track);
        }
        let video = tracks
            .iter()
            .find(|t| t.kind == StreamKind::Video)
            .map(|t| t.number);

        *ctx.region = DataRegion::new(header.movi_start, header.movi_end);
        let mut demuxer = Self {
            tracks,
            index: None,
            idx_pos: 0,
            mode: ReadMode::Interleaved,
            video,
            frames: 0,
            header_frames: header.odml_frames.unwrap_or(header.main.total_frames),
            pts_from_bytes: ctx.config.avi.pts_from_bps,
            index_mode: ctx.config.index.mode,
        };

        demuxer.index = demuxer.load_index(ctx, &header);
        demuxer.frames = match (&demuxer.index, demuxer.video) {
            (Some(index), Some(v)) => index.count_for_stream(v) as u64,
            (None, Some(v)) => demuxer
                .track(v)
                .map(|t| t.header_length)
                .unwrap_or(demuxer.header_frames) as u64,
            _ => 0,
        };

        let non_interleaved =
            ctx.config.avi.force_non_interleaved || demuxer.detect_non_interleaved();
        if non_interleaved && ctx.source.is_seekable() {
            demuxer.enter_non_interleaved(ctx.region.start, 0);
        }
        ctx.source.seek(ctx.region.start)?;
        Ok(demuxer)
    }

    fn track(&self, number: u32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.number == number)
    }

    fn track_mut(&mut self, number: u32) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.number == number)
    }

    fn keyframe_rules(&self) -> Vec<Option<KeyframeRule>> {
        let len = self.tracks.iter().map(|t| t.number + 1).max().unwrap_or(0);
        (0..len)
            .map(|n| self.track(n).map(|t| t.rule))
            .collect()
    }

    fn load_index(&self, ctx: &mut DemuxContext<'_>, header: &AviHeader) -> Option<ChunkIndex> {
        let mode = self.index_mode;
        if mode == IndexMode::Ignore {
            info!("avi: index ignored");
            return None;
        }
        let region = *ctx.region;

        if let Some(path) = &ctx.config.index.file_load {
            match sidefile::load(path) {
                Ok(entries) => {
                    let index = ChunkIndex::build(entries, region);
                    if index.dropped() == 0 && !index.is_empty() {
                        return Some(index);
                    }
                    warn!(
                        "avi: side-file {} does not match this file, {} entries outside data",
                        path.display(),
                        index.dropped()
                    );
                }
                Err(e) => warn!("avi: side-file {} not loaded: {}", path.display(), e),
            }
        }

        if mode != IndexMode::Force {
            if let Some(index) = self.embedded_index(ctx, header) {
                return Some(index);
            }
        }
        if matches!(mode, IndexMode::Force | IndexMode::Build) {
            return self.rebuild_index(ctx).ok();
        }
        None
    }

    fn embedded_index(&self, ctx: &mut DemuxContext<'_>, header: &AviHeader) -> Option<ChunkIndex> {
        let region = *ctx.region;
        if header.streams.iter().any(|s| s.super_index.is_some()) {
            match odml::read_index(ctx.source, header) {
                Ok(mut entries) => {
                    entries.sort_by_key(|e| e.offset);
                    if let Some(video) = self.video {
                        match odml::probe_delta_tag(ctx.source, &entries, video) {
                            Ok(Some(actual)) => {
                                odml::repair_delta_tags(&mut entries, video, actual);
                            }
                            Ok(None) => {}
                            Err(e) => debug!("avi: delta tag probe failed: {}", e),
                        }
                    }
                    let index = ChunkIndex::build(entries, region);
                    if !index.is_empty() {
                        info!("avi: using OpenDML index, {} entries", index.len());
                        return Some(index);
                    }
                }
                Err(e) => warn!("avi: OpenDML index rejected: {}", e),
            }
        }
        if !header.idx1.is_empty() {
            let index = ChunkIndex::build(idx1_entries(header), region);
            if !index.is_empty() {
                info!(
                    "avi: using idx1, {} entries ({} outside data)",
                    index.len(),
                    index.dropped()
                );
                return Some(index);
            }
            warn!("avi: idx1 has no usable entries");
        }
        None
    }

    /// Linear scan of the data region; the source position is restored.
    fn rebuild_index(&self, ctx: &mut DemuxContext<'_>) -> Result<ChunkIndex> {
        if !ctx.source.is_seekable() {
            warn!("avi: cannot rebuild the index of a forward-only source");
            return Err(DemuxError::IndexUnavailable);
        }
        let resume = ctx.source.tell();
        let recovered = recover::recover_index(ctx.source, *ctx.region, &self.keyframe_rules());
        ctx.source.seek(resume)?;
        let recovered = recovered?;
        ctx.diag.skipped_records += recovered.skipped;

        if let Some(path) = &ctx.config.index.file_save {
            if let Err(e) = sidefile::save(path, &recovered.entries) {
                warn!("avi: side-file {} not written: {}", path.display(), e);
            }
        }
        Ok(ChunkIndex::build(recovered.entries, *ctx.region))
    }

    fn detect_non_interleaved(&self) -> bool {
        let Some(index) = &self.index else {
            return false;
        };
        let first_of = |kind: StreamKind| {
            index
                .entries()
                .iter()
                .find(|e| {
                    e.stream_number()
                        .and_then(|n| self.track(n))
                        .map(|t| t.kind == kind)
                        .unwrap_or(false)
                })
                .map(|e| e.offset)
        };
        match (first_of(StreamKind::Audio), first_of(StreamKind::Video)) {
            (Some(a), Some(v)) if a.abs_diff(v) > NI_DISTANCE => {
                info!("avi: audio and video {} bytes apart, non-interleaved", a.abs_diff(v));
                true
            }
            _ => false,
        }
    }

    /// Switches to per-stream cursors starting at index position `idx_pos`
    /// or file offset `file_pos`.
    fn enter_non_interleaved(&mut self, file_pos: u64, idx_pos: usize) {
        self.mode = if self.index.is_some() {
            ReadMode::NonInterleaved
        } else {
            ReadMode::NonInterleavedNoIndex
        };
        for track in &mut self.tracks {
            track.cursor = idx_pos;
            track.file_cursor = file_pos;
        }
        info!("avi: reading in {:?} mode", self.mode);
    }

    /// Reads the payload of the record at `pos` and queues it. Returns
    /// whether a packet reached a selected stream.
    fn deliver(
        &mut self,
        ctx: &mut DemuxContext<'_>,
        tag: FourCC,
        pos: u64,
        len: u32,
        indexed_key: Option<bool>,
    ) -> Result<bool> {
        let Some(number) = stream_number(tag) else {
            return Ok(false);
        };
        let from_bytes = self.pts_from_bytes;
        let Some(track) = self.track_mut(number) else {
            trace!("avi: record {} for unknown stream", tag);
            ctx.diag.skipped_records += 1;
            return Ok(false);
        };

        let pts = track.next_pts(from_bytes);
        let skip = track.skip_chunks > 0;
        track.advance(len);
        if skip {
            track.skip_chunks -= 1;
        }
        if skip || !ctx.streams.is_selected(number) {
            return Ok(false);
        }

        let mut data = match ctx.source.read_bytes(len as usize) {
            Ok(data) => data,
            Err(DemuxError::ShortRead { got, .. }) => {
                warn!("avi: record {} at {} cut short after {} bytes", tag, pos, got);
                ctx.diag.skipped_records += 1;
                return Err(DemuxError::EndOfData);
            }
            Err(e) => return Err(e),
        };
        let is_key = match indexed_key {
            Some(key) => key,
            None => track.rule.is_keyframe(&data[..data.len().min(KEYFRAME_PROBE_BYTES)]),
        };
        let mut pts = pts;
        if let Some((cut, first_pts)) = track.trim.take() {
            data = data.slice((cut as usize).min(data.len())..);
            pts = first_pts;
        }

        let packet = Packet::new(data)
            .with_pts(pts)
            .with_pos(pos)
            .with_stream_id(number)
            .with_key_flag(is_key);
        Ok(ctx.streams.push(packet))
    }

    fn would_overflow(&self, ctx: &DemuxContext<'_>, tag: FourCC, len: u32, wanted: Option<u32>) -> bool {
        match (stream_number(tag), wanted) {
            (Some(n), Some(w)) if n != w => {
                ctx.streams.is_selected(n) && ctx.streams.would_overflow(n, len as usize)
            }
            _ => false,
        }
    }

    /// Validates the record header at the entry against the index.
    fn indexed_record(
        &self,
        ctx: &mut DemuxContext<'_>,
        entry: &IndexEntry,
    ) -> Result<Option<(FourCC, u32)>> {
        if entry.flags & AVIIF_LIST != 0 && !valid_stream_id(entry.tag) {
            return Ok(None);
        }
        if !ctx.region.contains(entry.offset) {
            return Ok(None);
        }
        if ctx.source.tell() != entry.offset {
            ctx.source.seek(entry.offset)?;
        }
        let (mut id, mut len) = match (ctx.source.read_fourcc(), ctx.source.read_u32_le()) {
            (Ok(id), Ok(len)) => (id, len),
            _ => return Err(DemuxError::EndOfData),
        };

        if id != entry.tag {
            debug!("avi: chunk id mismatch, raw {} index {}", id, entry.tag);
            if valid_fourcc(entry.tag) {
                id = entry.tag;
            } else if !valid_fourcc(id) {
                return Ok(None);
            }
        }
        if len != entry.len && len.wrapping_add(1) != entry.len {
            debug!("avi: chunk size mismatch, raw {} index {}", len, entry.len);
            if len > MAX_TRUSTED_LEN && entry.len > MAX_TRUSTED_LEN {
                return Ok(None);
            }
            len = choose_chunk_len(entry.len, len);
        }
        if !valid_stream_id(id) {
            return Ok(None);
        }
        Ok(Some((id, len)))
    }

    fn fill_indexed(&mut self, ctx: &mut DemuxContext<'_>, wanted: Option<u32>) -> Result<Fill> {
        loop {
            let Some(entry) = self.index.as_ref().and_then(|i| i.get(self.idx_pos)).copied() else {
                return Ok(Fill::EndOfData);
            };
            self.idx_pos += 1;
            let Some((tag, len)) = self.indexed_record(ctx, &entry)? else {
                ctx.diag.skipped_records += 1;
                continue;
            };
            if self.would_overflow(ctx, tag, len, wanted) {
                warn!("avi: queue for {} overflows, file is badly interleaved", tag);
                self.idx_pos -= 1;
                self.enter_non_interleaved(entry.offset, self.idx_pos);
                return self.fill_non_interleaved(ctx, wanted);
            }
            if self.deliver(ctx, tag, entry.offset, len, Some(entry.is_keyframe()))? {
                return Ok(Fill::Filled);
            }
        }
    }

    /// Reads the next record header in file order, entering lists and
    /// resynchronizing over zero padding.
    fn next_record_header(&mut self, ctx: &mut DemuxContext<'_>) -> Result<Option<(u64, FourCC, u32)>> {
        loop {
            let mut pos = ctx.source.tell();
            if pos + 8 > ctx.region.end {
                return Ok(None);
            }
            let Ok(mut id) = ctx.source.read_fourcc() else {
                return Ok(None);
            };
            if id.0 == [0; 4] {
                warn!("avi: zero record id at {}, resynchronizing", pos);
                loop {
                    let Ok(next) = ctx.source.read_fourcc() else {
                        return Ok(None);
                    };
                    if stream_number(next).is_some() {
                        id = next;
                        pos = ctx.source.tell() - 4;
                        break;
                    }
                }
            }
            let Ok(len) = ctx.source.read_u32_le() else {
                return Ok(None);
            };
            if id == LIST || id == RIFF {
                if ctx.source.read_fourcc().is_err() {
                    return Ok(None);
                }
                continue;
            }
            return Ok(Some((pos, id, len)));
        }
    }

    fn skip_record(&self, ctx: &mut DemuxContext<'_>, pos: u64, id: FourCC, len: u32) -> Result<()> {
        let mut skip = (len as u64 + 1) & !1;
        if id != JUNK && !valid_stream_id(id) && skip > MAX_FOREIGN_SKIP {
            debug!("avi: foreign record {} of {} bytes, skipping {}", id, len, MAX_FOREIGN_SKIP);
            skip = MAX_FOREIGN_SKIP;
        }
        ctx.source.seek(pos + 8 + skip)
    }

    fn fill_linear(&mut self, ctx: &mut DemuxContext<'_>, wanted: Option<u32>) -> Result<Fill> {
        loop {
            let Some((pos, id, len)) = self.next_record_header(ctx)? else {
                return Ok(Fill::EndOfData);
            };
            if !valid_stream_id(id) {
                if id != JUNK {
                    trace!("avi: skipping {} at {}", id, pos);
                }
                self.skip_record(ctx, pos, id, len)?;
                continue;
            }
            if self.would_overflow(ctx, id, len, wanted) && ctx.source.is_seekable() {
                warn!("avi: queue for {} overflows, file is badly interleaved", id);
                self.enter_non_interleaved(pos, 0);
                return self.fill_non_interleaved(ctx, wanted);
            }
            let delivered = self.deliver(ctx, id, pos, len, None)?;
            self.skip_record(ctx, pos, id, len)?;
            if delivered {
                return Ok(Fill::Filled);
            }
        }
    }

    fn fill_non_interleaved(&mut self, ctx: &mut DemuxContext<'_>, wanted: Option<u32>) -> Result<Fill> {
        let target = wanted.or_else(|| {
            self.tracks
                .iter()
                .map(|t| t.number)
                .find(|&n| ctx.streams.is_selected(n))
        });
        let Some(number) = target else {
            return Ok(Fill::EndOfData);
        };
        if self.track(number).is_none() {
            return Ok(Fill::StreamEnded);
        }
        match self.mode {
            ReadMode::NonInterleaved => self.fill_ni(ctx, number),
            _ => self.fill_nini(ctx, number),
        }
    }

    fn fill_ni(&mut self, ctx: &mut DemuxContext<'_>, number: u32) -> Result<Fill> {
        loop {
            let next = {
                let Some(index) = self.index.as_ref() else {
                    return Ok(Fill::StreamEnded);
                };
                let start = self.track(number).map(|t| t.cursor).unwrap_or(usize::MAX);
                index
                    .entries()
                    .iter()
                    .enumerate()
                    .skip(start)
                    .find(|(_, e)| e.stream_number() == Some(number))
                    .map(|(i, e)| (i, *e))
            };
            let Some((i, entry)) = next else {
                return Ok(Fill::StreamEnded);
            };
            if let Some(track) = self.track_mut(number) {
                track.cursor = i + 1;
            }
            let record = match self.indexed_record(ctx, &entry) {
                Ok(record) => record,
                Err(DemuxError::EndOfData) => return Ok(Fill::StreamEnded),
                Err(e) => return Err(e),
            };
            let Some((tag, len)) = record else {
                ctx.diag.skipped_records += 1;
                continue;
            };
            match self.deliver(ctx, tag, entry.offset, len, Some(entry.is_keyframe())) {
                Ok(true) => return Ok(Fill::Filled),
                Ok(false) => {}
                Err(DemuxError::EndOfData) => return Ok(Fill::StreamEnded),
                Err(e) => return Err(e),
            }
        }
    }

    fn fill_nini(&mut self, ctx: &mut DemuxContext<'_>, number: u32) -> Result<Fill> {
        let start = self.track(number).map(|t| t.file_cursor).unwrap_or(u64::MAX);
        if start >= ctx.region.end {
            return Ok(Fill::StreamEnded);
        }
        ctx.source.seek(start)?;
        loop {
            let Some((pos, id, len)) = self.next_record_header(ctx)? else {
                if let Some(track) = self.track_mut(number) {
                    track.file_cursor = ctx.region.end;
                }
                return Ok(Fill::StreamEnded);
            };
            if stream_number(id) == Some(number) && valid_stream_id(id) {
                let delivered = match self.deliver(ctx, id, pos, len, None) {
                    Ok(delivered) => delivered,
                    Err(DemuxError::EndOfData) => return Ok(Fill::StreamEnded),
                    Err(e) => return Err(e),
                };
                self.skip_record(ctx, pos, id, len)?;
                if let Some(track) = self.track_mut(number) {
                    track.file_cursor = ctx.source.tell();
                }
                if delivered {
                    return Ok(Fill::Filled);
                }
            } else {
                self.skip_record(ctx, pos, id, len)?;
            }
        }
    }

    /// Entry positions of `number` in the index.
    fn positions_of(index: &ChunkIndex, number: u32) -> Vec<usize> {
        index
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.stream_number() == Some(number))
            .map(|(i, _)| i)
            .collect()
    }

    /// Picks the video keyframe for `req`. Returns the entry position, the
    /// frame number and whether the request fell outside the file.
    fn seek_video(&self, index: &ChunkIndex, video: u32, req: SeekRequest) -> Option<(usize, u64, bool)> {
        let track = self.track(video)?;
        let frames = Self::positions_of(index, video);
        if frames.is_empty() {
            return None;
        }
        let fps = track.time_base().units_per_second();
        let last = frames.len() as i64 - 1;
        // anything beyond one file length either way clamps the same
        let span = (last + 1) as f64;
        let rel = (if req.flags.factor {
            req.amount * frames.len() as f64
        } else {
            req.amount * fps
        })
        .clamp(-span, span) as i64;
        let current = if req.flags.absolute {
            0
        } else {
            (track.packs as i64).min(last)
        };
        let target = current.saturating_add(rel);
        let clamped = target < 0 || target > last;
        let target = target.clamp(0, last) as usize;
        let is_key = |f: usize| index.get(frames[f]).map(|e| e.is_keyframe()).unwrap_or(false);
        let key_at_or_before = |f: usize| (0..=f).rev().find(|&k| is_key(k));

        let frame = if rel > 0 {
            (target..frames.len())
                .find(|&f| is_key(f))
                .or_else(|| key_at_or_before(target))
                .unwrap_or(0)
        } else {
            key_at_or_before(target).unwrap_or(0)
        };
        Some((frames[frame], frame as u64, clamped))
    }

    /// Position of the first record of audio `track` to play from `pts`,
    /// with the bytes to cut from it for byte-addressed streams.
    fn seek_audio(index: &ChunkIndex, track: &Track, pts: f64) -> (usize, Option<(u32, f64)>) {
        let end = index.len();
        let units = pts * track.time_base().units_per_second();
        let mut bytes = 0u64;
        let mut blocks = 0u64;
        for (i, e) in index.entries().iter().enumerate() {
            if e.stream_number() != Some(track.number) {
                continue;
            }
            if track.is_cbr_audio() {
                let target = (units * track.sample_size as f64) as u64;
                if target < bytes + e.len as u64 {
                    let cut = (target.saturating_sub(bytes)) as u32;
                    let trim = (cut > 0).then_some((cut, pts));
                    return (i, trim);
                }
                bytes += e.len as u64;
            } else {
                if blocks as f64 >= units {
                    return (i, None);
                }
                blocks += track.blocks_in(e.len);
            }
        }
        (end, None)
    }

    fn seek_indexed(&mut self, ctx: &mut DemuxContext<'_>, req: SeekRequest) -> Result<SeekOutcome> {
        let Some(index) = self.index.take() else {
            return Ok(SeekOutcome::Unsupported);
        };
        let outcome = self.seek_with(ctx, &index, req);
        self.index = Some(index);
        outcome
    }

    fn seek_with(&mut self, ctx: &mut DemuxContext<'_>, index: &ChunkIndex, req: SeekRequest) -> Result<SeekOutcome> {
        let from_bytes = self.pts_from_bytes;
        let video = self
            .video
            .and_then(|v| self.seek_video(index, v, req).map(|s| (v, s)));

        let (ref_pts, mut own_pos, clamped) = match video {
            Some((v, (pos, frame, clamped))) => {
                let pts = self
                    .track(v)
                    .map(|t| t.time_base().to_seconds(frame as f64))
                    .unwrap_or(0.0);
                (pts, vec![(v, pos)], clamped)
            }
            None => {
                let current = self
                    .tracks
                    .iter()
                    .find(|t| t.kind == StreamKind::Audio)
                    .map(|t| t.next_pts(from_bytes))
                    .unwrap_or(0.0);
                let duration = match self.duration(Some(index)) {
                    QueryAnswer::Value(d) | QueryAnswer::Guess(d) => Some(d),
                    _ => None,
                };
                let target = req.target_time(current, duration).unwrap_or(0.0);
                let clamped = duration.map(|d| target > d).unwrap_or(false);
                (target, Vec::new(), clamped)
            }
        };

        let mut trims = Vec::new();
        for track in self.tracks.iter().filter(|t| t.kind == StreamKind::Audio) {
            let (pos, trim) = Self::seek_audio(index, track, ref_pts);
            own_pos.push((track.number, pos));
            trims.push((track.number, trim));
        }
        let restart = own_pos
            .iter()
            .map(|&(_, p)| p)
            .min()
            .unwrap_or(0)
            .min(index.len());

        let interleaved = self.mode == ReadMode::Interleaved;
        for track in &mut self.tracks {
            track.reset_counters();
            let own = own_pos
                .iter()
                .find(|&&(n, _)| n == track.number)
                .map(|&(_, p)| p)
                .unwrap_or(restart);
            let counted_until = if interleaved { restart } else { own };
            for e in &index.entries()[..counted_until.min(index.len())] {
                if e.stream_number() == Some(track.number) {
                    track.advance(e.len);
                }
            }
            if interleaved {
                track.skip_chunks = index.entries()[restart..own.max(restart).min(index.len())]
                    .iter()
                    .filter(|e| e.stream_number() == Some(track.number))
                    .count() as u64;
            }
            track.cursor = own;
            track.trim = trims
                .iter()
                .find(|&&(n, _)| n == track.number)
                .and_then(|&(_, t)| t);
        }
        if self.mode == ReadMode::NonInterleavedNoIndex {
            self.mode = ReadMode::NonInterleaved;
        }
        self.idx_pos = restart;

        let pos = index.get(restart).map(|e| e.offset).unwrap_or(ctx.region.end);
        ctx.source.seek(pos)?;
        debug!(
            "avi: seek to {:.3}s, restart at entry {} (offset {})",
            ref_pts, restart, pos
        );
        Ok(SeekOutcome::Moved { pos, clamped })
    }

    fn duration(&self, index: Option<&ChunkIndex>) -> QueryAnswer {
        if let Some(v) = self.video.and_then(|v| self.track(v)) {
            let fps = v.time_base().units_per_second();
            if self.frames == 0 || fps <= 0.0 {
                return QueryAnswer::DontKnow;
            }
            let secs = self.frames as f64 / fps;
            return if index.is_none() && v.header_length <= 1 {
                QueryAnswer::Guess(secs)
            } else {
                QueryAnswer::Value(secs)
            };
        }

        let Some(audio) = self.tracks.iter().find(|t| t.kind == StreamKind::Audio) else {
            return QueryAnswer::DontKnow;
        };
        match index {
            Some(index) => {
                let (packs, blocks) = index
                    .entries()
                    .iter()
                    .filter(|e| e.stream_number() == Some(audio.number))
                    .fold((0u64, 0u64), |(p, b), e| (p + 1, b + audio.blocks_in(e.len)));
                let units = if self.pts_from_bytes { blocks } else { packs };
                QueryAnswer::Value(audio.time_base().to_seconds(units as f64))
            }
            None if audio.header_length > 0 => {
                QueryAnswer::Guess(audio.time_base().to_seconds(audio.header_length as f64))
            }
            None => QueryAnswer::DontKnow,
        }
    }
}

impl FormatDemuxer for AviDemuxer {
    fn fill_buffer(&mut self, ctx: &mut DemuxContext<'_>, wanted: Option<u32>) -> Result<Fill> {
        match self.mode {
            ReadMode::Interleaved if self.index.is_some() => self.fill_indexed(ctx, wanted),
            ReadMode::Interleaved => self.fill_linear(ctx, wanted),
            _ => self.fill_non_interleaved(ctx, wanted),
        }
    }

    fn seek(&mut self, ctx: &mut DemuxContext<'_>, req: SeekRequest) -> Result<SeekOutcome> {
        if self.index.is_none() {
            if self.index_mode == IndexMode::Ignore {
                return Ok(SeekOutcome::Unsupported);
            }
            match self.rebuild_index(ctx) {
                Ok(index) if !index.is_empty() => {
                    if let Some(v) = self.video {
                        self.frames = index.count_for_stream(v) as u64;
                    }
                    self.index = Some(index);
                }
                Ok(_) | Err(_) => {
                    warn!("avi: no index, seeking unavailable");
                    return Ok(SeekOutcome::Unsupported);
                }
            }
        }
        self.seek_indexed(ctx, req)
    }

    /// Audio restarts at the record holding the video keyframe time and is
    /// trimmed there, so only video needs a keyframe.
    fn resync_policy(&self) -> ResyncPolicy {
        ResyncPolicy::VideoKeyframe
    }

    fn control(&mut self, ctx: &mut DemuxContext<'_>, query: Query) -> QueryAnswer {
        match query {
            Query::Duration => self.duration(self.index.as_ref()),
            Query::PercentPosition => match self.video.and_then(|v| self.track(v)) {
                Some(v) if self.frames > 0 => {
                    QueryAnswer::Value((v.packs * 100 / self.frames) as f64)
                }
                _ => percent_of(*ctx.region, ctx.source.tell()),
            },
        }
    }

    fn chunk_index(&self) -> Option<&ChunkIndex> {
        self.index.as_ref()
    }

    fn close(&mut self) {
        self.index = None;
        self.tracks.clear();
    }
}
