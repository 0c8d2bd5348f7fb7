use crate::av::{Packet, Stream, StreamKind, StreamSet};
use crate::config::DemuxConfig;
use crate::error::{DemuxError, Result};
use crate::format::{
    registry, DemuxContext, Diagnostics, Fill, FormatDemuxer, Query, QueryAnswer,
};
use crate::index::{ChunkIndex, SyncpointTable};
use crate::io::{ByteSource, DataRegion, Source};
use crate::seek::{ResyncPolicy, SeekOutcome, SeekRequest};
use log::{debug, info, warn};
use std::path::Path;

/// Audio packets this close before the sync point are kept.
const AUDIO_SYNC_SLACK: f64 = 1e-6;

/// An opened container.
///
/// Packets are pulled per stream with [`Demuxer::next_packet`]; records for
/// other selected streams are queued on the way.
pub struct Demuxer {
    source: Box<dyn ByteSource>,
    streams: StreamSet,
    region: DataRegion,
    config: DemuxConfig,
    diag: Diagnostics,
    driver: Box<dyn FormatDemuxer>,
    format: &'static str,
    seekable: bool,
}

impl Demuxer {
    /// Probes `source`, opens the matching format and reads its headers.
    pub fn open<S: ByteSource + 'static>(
        source: S,
        hint: Option<&str>,
        config: DemuxConfig,
    ) -> Result<Self> {
        let mut source: Box<dyn ByteSource> = Box::new(source);
        let format = registry::detect(source.as_mut(), hint, config.probe_size)?;

        let mut streams = StreamSet::new(config.queue.clone());
        let mut region = DataRegion::new(source.tell(), source.len().unwrap_or(u64::MAX));
        let mut diag = Diagnostics::default();

        let driver = {
            let mut ctx = DemuxContext {
                source: source.as_mut(),
                streams: &mut streams,
                region: &mut region,
                config: &config,
                diag: &mut diag,
            };
            format.open(&mut ctx)?
        };

        if streams.is_empty() {
            return Err(DemuxError::HeaderMalformed("no playable streams".into()));
        }
        info!(
            "opened {}: {} streams, data {}..{}",
            format.name(),
            streams.len(),
            region.start,
            region.end
        );

        let seekable = source.is_seekable();
        Ok(Self {
            source,
            streams,
            region,
            config,
            diag,
            driver,
            format: format.name(),
            seekable,
        })
    }

    pub fn open_path<P: AsRef<Path>>(path: P, config: DemuxConfig) -> Result<Self> {
        Self::open(Source::open(path)?, None, config)
    }

    fn with_driver<T>(
        &mut self,
        f: impl FnOnce(&mut dyn FormatDemuxer, &mut DemuxContext<'_>) -> T,
    ) -> T {
        let mut ctx = DemuxContext {
            source: self.source.as_mut(),
            streams: &mut self.streams,
            region: &mut self.region,
            config: &self.config,
            diag: &mut self.diag,
        };
        f(self.driver.as_mut(), &mut ctx)
    }

    /// One `fill_buffer` round; `EndOfData` marks every stream finished,
    /// `StreamEnded` only `wanted`.
    fn fill(&mut self, wanted: u32) -> Result<Fill> {
        let fill = match self.with_driver(|d, ctx| d.fill_buffer(ctx, Some(wanted))) {
            Ok(fill) => fill,
            Err(DemuxError::EndOfData) => Fill::EndOfData,
            Err(e) => return Err(e),
        };
        match fill {
            Fill::Filled => {
                let dropped = self.streams.enforce_limits(wanted);
                self.diag.dropped_packets += dropped as u64;
            }
            Fill::StreamEnded => self.streams.set_eof(wanted),
            Fill::EndOfData => self.streams.set_all_eof(),
        }
        Ok(fill)
    }

    /// Next packet of `stream_id`, or `None` once the stream is exhausted.
    /// Reading an unselected stream selects it.
    pub fn next_packet(&mut self, stream_id: u32) -> Result<Option<Packet>> {
        let stream = self
            .streams
            .get(stream_id)
            .ok_or(DemuxError::UnknownStream(stream_id))?;
        if !stream.is_selected() {
            self.streams.select(stream_id, true)?;
        }

        loop {
            if let Some(packet) = self.streams.pop(stream_id) {
                return Ok(Some(packet));
            }
            if self.streams.get(stream_id).map(Stream::is_eof).unwrap_or(true) {
                return Ok(None);
            }
            self.fill(stream_id)?;
        }
    }

    /// Repositions every stream. A source that cannot seek reports
    /// [`SeekOutcome::Unsupported`] and keeps its current position. A NaN
    /// amount is [`DemuxError::SeekTargetUnreachable`].
    pub fn seek(&mut self, req: SeekRequest) -> Result<SeekOutcome> {
        if !self.seekable {
            warn!("{}: seek on a forward-only source ignored", self.format);
            return Ok(SeekOutcome::Unsupported);
        }
        if req.amount.is_nan() {
            return Err(DemuxError::SeekTargetUnreachable);
        }

        let current = self.current_pts();
        let duration = match self.query(Query::Duration) {
            QueryAnswer::Value(d) | QueryAnswer::Guess(d) => Some(d),
            _ => None,
        };

        let outcome = self.with_driver(|d, ctx| d.seek(ctx, req))?;
        if let SeekOutcome::Moved { pos, clamped } = outcome {
            debug!("{}: seek {:?} -> {} (clamped {})", self.format, req, pos, clamped);
            self.streams.reset();
            let target = if clamped {
                None
            } else {
                req.target_time(current, duration)
            };
            let policy = self.driver.resync_policy();
            self.resync(policy, target)?;
        }
        Ok(outcome)
    }

    fn current_pts(&self) -> f64 {
        [StreamKind::Video, StreamKind::Audio]
            .iter()
            .filter_map(|&k| self.streams.selected_of_kind(k))
            .filter_map(|id| self.streams.get(id).and_then(Stream::last_pts))
            .next()
            .unwrap_or(0.0)
    }

    fn resync(&mut self, policy: ResyncPolicy, target: Option<f64>) -> Result<()> {
        if policy == ResyncPolicy::None {
            return Ok(());
        }

        let mut sync_pts = None;
        if let Some(video) = self.streams.selected_of_kind(StreamKind::Video) {
            let mut dropped = 0;
            loop {
                let front = self.streams.front(video).map(|p| (p.is_key, p.pts));
                match front {
                    Some((true, pts)) => {
                        sync_pts = Some(pts);
                        break;
                    }
                    Some((false, _)) => {
                        self.streams.pop(video);
                        dropped += 1;
                    }
                    None => {
                        if self.fill(video)? != Fill::Filled {
                            break;
                        }
                    }
                }
            }
            debug!("resync: dropped {} video packets before keyframe", dropped);
        }

        if policy != ResyncPolicy::VideoKeyframeThenAudio {
            return Ok(());
        }
        let Some(sync) = sync_pts.or(target) else {
            return Ok(());
        };

        let audio_ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|s| s.kind() == StreamKind::Audio && s.is_selected())
            .map(Stream::id)
            .collect();
        for audio in audio_ids {
            loop {
                let front = self.streams.front(audio).map(|p| p.pts);
                match front {
                    Some(pts) if pts + AUDIO_SYNC_SLACK < sync => {
                        self.streams.pop(audio);
                    }
                    Some(_) => break,
                    None => {
                        if self.fill(audio)? != Fill::Filled {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn query(&mut self, query: Query) -> QueryAnswer {
        self.with_driver(|d, ctx| d.control(ctx, query))
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter()
    }

    pub fn stream(&self, id: u32) -> Option<&Stream> {
        self.streams.get(id)
    }

    pub fn select_stream(&mut self, id: u32, selected: bool) -> Result<()> {
        self.streams.select(id, selected)
    }

    /// First selected stream of `kind`.
    pub fn default_stream(&self, kind: StreamKind) -> Option<u32> {
        self.streams.selected_of_kind(kind)
    }

    pub fn format_name(&self) -> &'static str {
        self.format
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub fn data_region(&self) -> DataRegion {
        self.region
    }

    /// Byte offset the next record will be read from.
    pub fn position(&self) -> u64 {
        self.source.tell()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn chunk_index(&self) -> Option<&ChunkIndex> {
        self.driver.chunk_index()
    }

    pub fn syncpoints(&self) -> Option<&SyncpointTable> {
        self.driver.syncpoints()
    }

    pub fn close(mut self) {
        self.driver.close();
        debug!("{}: closed, diagnostics {:?}", self.format, self.diag);
    }
}
