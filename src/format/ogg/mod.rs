//! # Ogg
//!
//! Checksummed pages carrying interleaved logical streams. Each logical
//! stream announces its codec in a beginning-of-stream page; packets span
//! pages through lacing and are timed from the granule position of the page
//! they end on. Seeking goes through a [`SyncpointTable`](crate::index::SyncpointTable)
//! of the reference stream, built at open or on the first seek.

mod codec;
mod demuxer;
pub mod page;
mod sync;

pub use codec::{Ident, OggCodec};
pub use demuxer::OggDemuxer;

use super::{DemuxContext, FormatDemuxer, FormatDriver, Probe};
use crate::error::Result;
use crate::io::ByteSource;

pub struct OggDriver;

impl FormatDriver for OggDriver {
    fn name(&self) -> &'static str {
        "ogg"
    }

    fn probe(&self, source: &mut dyn ByteSource, probe_size: usize) -> Result<Probe> {
        if source.peek(4)? == page::CAPTURE {
            return Ok(Probe::Definite);
        }
        let window = source.peek(probe_size)?;
        let found = window.windows(4).any(|w| w == page::CAPTURE);
        Ok(if found { Probe::Low } else { Probe::No })
    }

    fn open(&self, ctx: &mut DemuxContext<'_>) -> Result<Box<dyn FormatDemuxer>> {
        Ok(Box::new(OggDemuxer::open(ctx)?))
    }
}
