//! # Container formats
//!
//! Each container is a [`FormatDriver`] (probe + open) producing a
//! [`FormatDemuxer`] that owns the format-private state: header data, index,
//! reassemblers and read cursors. The [`registry`] picks a driver for a
//! source; [`crate::Demuxer`] drives the chosen one.

use crate::av::StreamSet;
use crate::config::DemuxConfig;
use crate::error::Result;
use crate::index::{ChunkIndex, SyncpointTable};
use crate::io::{ByteSource, DataRegion};
use crate::seek::{ResyncPolicy, SeekOutcome, SeekRequest};

pub mod asf;
pub mod avi;
pub mod film;
pub mod ogg;
pub mod rawdv;
pub mod reassembly;
pub mod registry;
pub mod roq;
pub mod samples;
pub mod vqf;

pub use reassembly::{Fragment, Reassembler, ReassemblyStats};

/// How sure a probe is that the source holds its format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Probe {
    No,
    Low,
    Definite,
}

/// Anomalies absorbed while demuxing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Records skipped for a bad tag, size or stream id.
    pub skipped_records: u64,
    pub broken_fragments: u64,
    pub offset_mismatches: u64,
    /// Packets flushed before all fragments arrived.
    pub incomplete_packets: u64,
    pub crc_errors: u64,
    /// Packets dropped to keep queues inside their limits.
    pub dropped_packets: u64,
}

impl Diagnostics {
    pub fn absorb(&mut self, before: ReassemblyStats, after: ReassemblyStats) {
        self.broken_fragments += after.broken - before.broken;
        self.offset_mismatches += after.offset_mismatches - before.offset_mismatches;
        self.incomplete_packets += after.incomplete - before.incomplete;
    }
}

/// Everything a driver touches besides its own state.
pub struct DemuxContext<'a> {
    pub source: &'a mut dyn ByteSource,
    pub streams: &'a mut StreamSet,
    pub region: &'a mut DataRegion,
    pub config: &'a DemuxConfig,
    pub diag: &'a mut Diagnostics,
}

/// Result of one `fill_buffer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// At least one record was consumed.
    Filled,
    /// The wanted stream has no more records; others may.
    StreamEnded,
    EndOfData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Total length in seconds.
    Duration,
    /// Read position as a percentage of the file.
    PercentPosition,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryAnswer {
    Value(f64),
    /// Derived from incomplete information.
    Guess(f64),
    DontKnow,
    Unsupported,
}

pub trait FormatDriver: Sync {
    fn name(&self) -> &'static str;

    /// Inspects the head of `source` through `peek` only.
    fn probe(&self, source: &mut dyn ByteSource, probe_size: usize) -> Result<Probe>;

    /// Parses headers, registers streams, sets the data region and builds or
    /// loads the index.
    fn open(&self, ctx: &mut DemuxContext<'_>) -> Result<Box<dyn FormatDemuxer>>;
}

pub trait FormatDemuxer: Send {
    /// Consumes records until at least one packet has been queued on a
    /// selected stream. `wanted` names the stream the caller is waiting for.
    fn fill_buffer(&mut self, ctx: &mut DemuxContext<'_>, wanted: Option<u32>) -> Result<Fill>;

    /// Repositions the source; in-progress reassembly is discarded.
    fn seek(&mut self, ctx: &mut DemuxContext<'_>, req: SeekRequest) -> Result<SeekOutcome>;

    fn control(&mut self, _ctx: &mut DemuxContext<'_>, _query: Query) -> QueryAnswer {
        QueryAnswer::Unsupported
    }

    fn resync_policy(&self) -> ResyncPolicy {
        ResyncPolicy::VideoKeyframeThenAudio
    }

    fn chunk_index(&self) -> Option<&ChunkIndex> {
        None
    }

    fn syncpoints(&self) -> Option<&SyncpointTable> {
        None
    }

    fn close(&mut self) {}
}

/// Percentage of `region` already consumed at `pos`.
pub fn percent_of(region: DataRegion, pos: u64) -> QueryAnswer {
    if region.is_empty() || region.end == u64::MAX {
        return QueryAnswer::DontKnow;
    }
    let done = pos.saturating_sub(region.start).min(region.len());
    QueryAnswer::Value(done as f64 * 100.0 / region.len() as f64)
}
