use super::codec::{identify, ogm_payload, Ident, OggCodec};
use super::page::{Page, PageReader};
use super::sync;
use crate::av::{Packet, Stream, StreamKind, StreamSet};
use crate::config::OggIndexMode;
use crate::error::{DemuxError, Result};
use crate::format::{
    percent_of, DemuxContext, Fill, FormatDemuxer, Fragment, Query, QueryAnswer, Reassembler,
};
use crate::index::SyncpointTable;
use crate::io::DataRegion;
use crate::seek::{SeekOutcome, SeekRequest};
use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, info, trace, warn};
use std::collections::VecDeque;

/// Pages read at open to collect header packets before giving up.
const MAX_HEADER_PAGES: usize = 64;
/// Pages read while refining a seek before giving up on a granule.
const MAX_REFINE_PAGES: usize = 64;

struct Track {
    id: u32,
    serial: u32,
    ident: Ident,
    reassembler: Reassembler,
    /// Packet counter used as the reassembly sequence.
    seq: u32,
    /// Header packets still to be dropped from the packet flow.
    headers_left: usize,
    /// Timestamp at the end of the last page with a granule.
    last_pts: Option<f64>,
}

/// Header packets of one stream being collected at open.
struct HeaderCollector {
    serial: u32,
    ident: Ident,
    packets: Vec<Bytes>,
    partial: Option<BytesMut>,
}

impl HeaderCollector {
    fn needed(&self) -> usize {
        self.ident.headers.unwrap_or(1)
    }

    fn is_complete(&self) -> bool {
        self.packets.len() >= self.needed()
    }

    fn take_page(&mut self, page: &Page) {
        for (i, piece) in page.pieces().into_iter().enumerate() {
            if self.is_complete() {
                return;
            }
            let continues = i == 0 && page.is_continued();
            let mut buf = match (continues, self.partial.take()) {
                (true, Some(buf)) => buf,
                (true, None) => continue,
                (false, _) => BytesMut::new(),
            };
            buf.extend_from_slice(&piece.data);
            if piece.complete {
                self.packets.push(buf.freeze());
            } else {
                self.partial = Some(buf);
            }
        }
    }

    /// Header packets, each behind a two-byte big-endian length.
    fn extra_data(&self) -> Bytes {
        if self.ident.headers.is_none() {
            return Bytes::from(self.ident.extra.clone());
        }
        let mut out = BytesMut::new();
        for packet in &self.packets {
            let len = packet.len().min(u16::MAX as usize);
            out.put_u16(len as u16);
            out.extend_from_slice(&packet[..len]);
        }
        out.freeze()
    }

    fn into_stream(self, id: u32) -> (Stream, Track) {
        let extra = self.extra_data();
        let ident = self.ident;
        let mut stream = Stream::new(id, ident.kind, ident.tag.clone())
            .with_time_base(ident.time_base)
            .with_extra_data(extra);
        stream.video = ident.video;
        stream.audio = ident.audio;
        let track = Track {
            id,
            serial: self.serial,
            headers_left: ident.headers.map(|n| n.saturating_sub(1)).unwrap_or(0),
            ident,
            reassembler: Reassembler::new(),
            seq: 0,
            last_pts: None,
        };
        (stream, track)
    }
}

/// Hands a reassembled packet to its queue. Returns whether it was queued.
fn deliver(
    ident: &Ident,
    headers_left: &mut usize,
    streams: &mut StreamSet,
    mut packet: Packet,
    pts: f64,
) -> bool {
    if *headers_left > 0 {
        *headers_left -= 1;
        return false;
    }
    packet.is_key = ident.is_keyframe(&packet.data);
    if ident.codec == OggCodec::Ogm {
        let Some(payload) = ogm_payload(&packet.data) else {
            return false;
        };
        let start = packet.data.len() - payload.len();
        packet.data = packet.data.slice(start..);
    }
    packet.pts = pts;
    streams.push(packet)
}

/// Pages of one physical stream with any number of logical streams
/// multiplexed in.
pub struct OggDemuxer {
    reader: PageReader,
    tracks: Vec<Track>,
    /// Track whose granules drive seeking and the duration.
    reference: Option<usize>,
    /// Pages read at open that still have to be demuxed.
    replay: VecDeque<Page>,
    syncpoints: Option<SyncpointTable>,
    duration: Option<f64>,
    refinements: u32,
    tolerance: f64,
    flushed: bool,
}

impl OggDemuxer {
    pub fn open(ctx: &mut DemuxContext<'_>) -> Result<Self> {
        let mut reader = PageReader::new();
        let mut collectors: Vec<HeaderCollector> = Vec::new();
        let mut replay = VecDeque::new();

        let mut page = reader.next_page(ctx.source, u64::MAX)?;
        while let Some(bos) = page.take() {
            if !bos.is_bos() {
                page = Some(bos);
                break;
            }
            let first = bos.pieces().into_iter().next();
            match first.as_ref().and_then(|p| identify(&p.data)) {
                Some(ident) => {
                    info!(
                        "ogg: serial {:08x} is {:?} {:?}",
                        bos.serial, ident.codec, ident.kind
                    );
                    collectors.push(HeaderCollector {
                        serial: bos.serial,
                        ident,
                        packets: first.map(|p| vec![p.data]).unwrap_or_default(),
                        partial: None,
                    });
                }
                None => warn!("ogg: serial {:08x} of unknown type ignored", bos.serial),
            }
            page = reader.next_page(ctx.source, u64::MAX)?;
        }
        if collectors.is_empty() {
            return Err(DemuxError::HeaderMalformed("no known logical stream".into()));
        }

        let mut data_start = page.as_ref().map(|p| p.pos).unwrap_or_else(|| ctx.source.tell());
        let mut pages = 0;
        while let Some(p) = page.take() {
            if let Some(c) = collectors.iter_mut().find(|c| c.serial == p.serial) {
                c.take_page(&p);
            }
            let done = collectors.iter().all(HeaderCollector::is_complete);
            if !collectors.iter().all(|c| c.ident.headers.is_none()) {
                data_start = p.end();
            }
            replay.push_back(p);
            pages += 1;
            if done || pages >= MAX_HEADER_PAGES {
                break;
            }
            page = reader.next_page(ctx.source, u64::MAX)?;
        }
        for c in collectors.iter().filter(|c| !c.is_complete()) {
            warn!(
                "ogg: serial {:08x} has {} of {} header packets",
                c.serial,
                c.packets.len(),
                c.needed()
            );
        }
        ctx.diag.crc_errors += reader.take_corrupt();

        let mut tracks = Vec::new();
        for (id, collector) in collectors.into_iter().enumerate() {
            let (stream, track) = collector.into_stream(id as u32);
            ctx.streams.add(stream)?;
            tracks.push(track);
        }
        let reference = tracks
            .iter()
            .position(|t| t.ident.kind == StreamKind::Video)
            .or_else(|| tracks.iter().position(|t| t.ident.kind == StreamKind::Audio));

        *ctx.region = DataRegion::new(data_start, ctx.source.len().unwrap_or(u64::MAX));
        let mut demuxer = Self {
            reader,
            tracks,
            reference,
            replay,
            syncpoints: None,
            duration: None,
            refinements: ctx.config.ogg.seek_refinements,
            tolerance: ctx.config.ogg.seek_tolerance,
            flushed: false,
        };

        if ctx.source.is_seekable() {
            let resume = ctx.source.tell();
            match ctx.config.ogg.index {
                OggIndexMode::Full => demuxer.build_syncpoints(ctx),
                OggIndexMode::DurationOnly => demuxer.read_tail_duration(ctx),
                OggIndexMode::Lazy => {}
            }
            ctx.source.seek(resume)?;
        }
        Ok(demuxer)
    }

    fn build_syncpoints(&mut self, ctx: &mut DemuxContext<'_>) {
        let Some(r) = self.reference else {
            return;
        };
        let track = &self.tracks[r];
        match sync::scan_syncpoints(ctx.source, &mut self.reader, *ctx.region, track.serial, &track.ident) {
            Ok(table) => {
                if let Some(max) = table.max_pts() {
                    self.duration = Some(self.duration.map_or(max, |d| d.max(max)));
                }
                self.syncpoints = Some(table);
            }
            Err(e) => warn!("ogg: syncpoint scan failed: {}", e),
        }
        ctx.diag.crc_errors += self.reader.take_corrupt();
    }

    fn read_tail_duration(&mut self, ctx: &mut DemuxContext<'_>) {
        let Some(r) = self.reference else {
            return;
        };
        let track = &self.tracks[r];
        match sync::tail_duration(ctx.source, &mut self.reader, *ctx.region, track.serial, &track.ident) {
            Ok(duration) => self.duration = duration,
            Err(e) => warn!("ogg: duration scan failed: {}", e),
        }
        ctx.diag.crc_errors += self.reader.take_corrupt();
    }

    fn next_page(&mut self, ctx: &mut DemuxContext<'_>) -> Result<Option<Page>> {
        if let Some(page) = self.replay.pop_front() {
            return Ok(Some(page));
        }
        let page = self.reader.next_page(ctx.source, ctx.region.end)?;
        ctx.diag.crc_errors += self.reader.take_corrupt();
        Ok(page)
    }

    /// Demuxes one page of track `ti`. Returns whether a packet reached a
    /// selected stream.
    fn push_page(&mut self, ctx: &mut DemuxContext<'_>, ti: usize, page: &Page) -> bool {
        let Track {
            id,
            ident,
            reassembler,
            seq,
            headers_left,
            last_pts,
            ..
        } = &mut self.tracks[ti];
        let page_units = ident.granule_units(page.granule);
        let completed = page.completed_packets();

        if !ctx.streams.is_selected(*id) {
            *headers_left = headers_left.saturating_sub(completed);
            reassembler.reset();
            if let Some(units) = page_units {
                *last_pts = Some(ident.units_to_pts(units));
            }
            return false;
        }

        let streams = &mut *ctx.streams;
        let mut delivered = false;
        let mut done = 0usize;
        for (i, piece) in page.pieces().iter().enumerate() {
            let continues = i == 0 && page.is_continued();
            if continues && !reassembler.has_pending() {
                trace!("ogg: stream {} continuation without a head dropped", id);
                ctx.diag.broken_fragments += 1;
                if piece.complete {
                    done += 1;
                }
                continue;
            }
            if !continues {
                *seq = seq.wrapping_add(1);
            }

            let pts = match page_units {
                Some(units) if piece.complete => {
                    let back = (completed - 1 - done) as i64;
                    if back == 0 {
                        ident.units_to_pts(units)
                    } else if ident.frame_granules() {
                        ident.units_to_pts(units - back)
                    } else {
                        last_pts.unwrap_or(0.0)
                    }
                }
                _ => last_pts.unwrap_or(0.0),
            };

            if piece.data.is_empty() {
                if piece.complete {
                    done += 1;
                    if let Some(packet) = reassembler.finish() {
                        delivered |= deliver(ident, headers_left, streams, packet, pts);
                    } else if *headers_left > 0 {
                        *headers_left -= 1;
                    }
                }
                continue;
            }

            let before = reassembler.stats();
            let frag = Fragment {
                stream_id: *id,
                seq: *seq,
                offset: None,
                total_len: None,
                data: &piece.data,
                pts,
                pos: page.pos,
                keyframe: false,
                last: piece.complete,
            };
            reassembler.push(frag, |packet| {
                delivered |= deliver(ident, headers_left, streams, packet, pts);
            });
            ctx.diag.absorb(before, reassembler.stats());
            if piece.complete {
                done += 1;
            }
        }
        if let Some(units) = page_units {
            *last_pts = Some(ident.units_to_pts(units));
        }
        delivered
    }

    fn flush_all(&mut self, ctx: &mut DemuxContext<'_>) -> bool {
        if self.flushed {
            return false;
        }
        self.flushed = true;
        let mut delivered = false;
        for track in &mut self.tracks {
            let before = track.reassembler.stats();
            if let Some(packet) = track.reassembler.flush() {
                let pts = track.last_pts.unwrap_or(packet.pts);
                delivered |= deliver(&track.ident, &mut track.headers_left, ctx.streams, packet, pts);
            }
            ctx.diag.absorb(before, track.reassembler.stats());
        }
        delivered
    }

    fn reset_read_state(&mut self) {
        self.replay.clear();
        self.flushed = false;
        for track in &mut self.tracks {
            track.reassembler.reset();
            track.headers_left = 0;
            track.last_pts = None;
        }
    }

    /// Timestamp of the first reference-stream granule at or after the
    /// current position.
    fn next_reference_pts(&mut self, ctx: &mut DemuxContext<'_>) -> Result<Option<f64>> {
        let Some(r) = self.reference else {
            return Ok(None);
        };
        for _ in 0..MAX_REFINE_PAGES {
            let Some(page) = self.reader.next_page(ctx.source, ctx.region.end)? else {
                return Ok(None);
            };
            let track = &self.tracks[r];
            if page.serial == track.serial {
                if let Some(pts) = track.ident.granule_pts(page.granule) {
                    return Ok(Some(pts));
                }
            }
        }
        Ok(None)
    }

    /// Steps back through the table while the reference stream starts too
    /// far past `target`.
    fn refine(
        &mut self,
        ctx: &mut DemuxContext<'_>,
        table: &SyncpointTable,
        mut i: usize,
        target: f64,
    ) -> Result<usize> {
        for round in 0..self.refinements {
            let Some(point) = table.get(i) else {
                break;
            };
            ctx.source.seek(point.offset)?;
            match self.next_reference_pts(ctx)? {
                Some(pts) if pts > target + self.tolerance && i > 0 => {
                    debug!(
                        "ogg: refinement {}: {:.3}s overshoots {:.3}s, stepping back",
                        round, pts, target
                    );
                    i -= 1;
                }
                _ => break,
            }
        }
        Ok(i)
    }

    fn current_pts(&self) -> f64 {
        self.reference
            .and_then(|r| self.tracks[r].last_pts)
            .unwrap_or(0.0)
    }

    fn seek_with(
        &mut self,
        ctx: &mut DemuxContext<'_>,
        table: &SyncpointTable,
        req: SeekRequest,
        current: f64,
    ) -> Result<SeekOutcome> {
        let region = *ctx.region;
        if req.flags.factor {
            let Some((target, clamped)) = req.target_offset(region, ctx.source.tell(), None) else {
                return Ok(SeekOutcome::Unsupported);
            };
            let pos = match table.index_for_offset(target).and_then(|i| table.get(i)) {
                Some(point) => point.offset,
                None => target,
            };
            return self.land(ctx, pos, clamped);
        }

        let Some(target) = req.target_time(current, self.duration) else {
            return Ok(SeekOutcome::Unsupported);
        };
        let clamped = self.duration.map(|d| target > d).unwrap_or(false);
        match table.index_for_time(target) {
            Some(i) => {
                let i = self.refine(ctx, table, i, target)?;
                let pos = table.get(i).map(|p| p.offset).unwrap_or(region.start);
                self.land(ctx, pos, clamped)
            }
            None => {
                let bytes_per_sec = self
                    .duration
                    .filter(|&d| d > 0.0 && region.end != u64::MAX)
                    .map(|d| region.len() as f64 / d);
                match req.target_offset(region, ctx.source.tell(), bytes_per_sec) {
                    Some((pos, byte_clamped)) => self.land(ctx, pos, clamped || byte_clamped),
                    None => Ok(SeekOutcome::Unsupported),
                }
            }
        }
    }

    /// Moves to `pos` and on to the next page boundary.
    fn land(&mut self, ctx: &mut DemuxContext<'_>, pos: u64, clamped: bool) -> Result<SeekOutcome> {
        ctx.source.seek(pos)?;
        if !super::page::sync(ctx.source, ctx.region.end)? {
            debug!("ogg: no page after {}", pos);
        }
        let pos = ctx.source.tell();
        debug!("ogg: seek lands at {}", pos);
        Ok(SeekOutcome::Moved { pos, clamped })
    }
}

impl FormatDemuxer for OggDemuxer {
    fn fill_buffer(&mut self, ctx: &mut DemuxContext<'_>, _wanted: Option<u32>) -> Result<Fill> {
        loop {
            let Some(page) = self.next_page(ctx)? else {
                return Ok(if self.flush_all(ctx) { Fill::Filled } else { Fill::EndOfData });
            };
            let Some(ti) = self.tracks.iter().position(|t| t.serial == page.serial) else {
                if page.is_bos() {
                    warn!("ogg: new logical stream {:08x} after the headers ignored", page.serial);
                }
                ctx.diag.skipped_records += 1;
                continue;
            };
            if self.push_page(ctx, ti, &page) {
                return Ok(Fill::Filled);
            }
        }
    }

    fn seek(&mut self, ctx: &mut DemuxContext<'_>, req: SeekRequest) -> Result<SeekOutcome> {
        let current = self.current_pts();
        self.reset_read_state();
        if self.syncpoints.is_none() && ctx.source.is_seekable() {
            self.build_syncpoints(ctx);
        }
        let table = self.syncpoints.take();
        let empty = SyncpointTable::new();
        let outcome = self.seek_with(ctx, table.as_ref().unwrap_or(&empty), req, current);
        self.syncpoints = table;
        outcome
    }

    fn control(&mut self, ctx: &mut DemuxContext<'_>, query: Query) -> QueryAnswer {
        match query {
            Query::Duration => match self.duration {
                Some(d) => QueryAnswer::Value(d),
                None => QueryAnswer::DontKnow,
            },
            Query::PercentPosition => percent_of(*ctx.region, ctx.source.tell()),
        }
    }

    fn syncpoints(&self) -> Option<&SyncpointTable> {
        self.syncpoints.as_ref()
    }

    fn close(&mut self) {
        self.reset_read_state();
        self.tracks.clear();
        self.syncpoints = None;
    }
}
