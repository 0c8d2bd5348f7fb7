//! # ASF
//!
//! Advanced Systems Format (WMV, WMA). The data object is a run of fixed-size
//! packets; each carries payloads that are whole media objects, pieces of
//! one, or groups of small ones. Pieces are rebuilt with the shared
//! [`Reassembler`](crate::format::Reassembler) and spread-spectrum audio is
//! descrambled after reassembly.

mod demuxer;
pub mod header;
pub mod payload;

pub use demuxer::AsfDemuxer;

use super::{DemuxContext, FormatDemuxer, FormatDriver, Probe};
use crate::error::Result;
use crate::io::ByteSource;

pub struct AsfDriver;

impl FormatDriver for AsfDriver {
    fn name(&self) -> &'static str {
        "asf"
    }

    fn probe(&self, source: &mut dyn ByteSource, _probe_size: usize) -> Result<Probe> {
        let head = source.peek(16)?;
        Ok(if head == header::HEADER_OBJECT.0 {
            Probe::Definite
        } else {
            Probe::No
        })
    }

    fn open(&self, ctx: &mut DemuxContext<'_>) -> Result<Box<dyn FormatDemuxer>> {
        Ok(Box::new(AsfDemuxer::open(ctx)?))
    }
}
