//! Reading and seeking over a sample table known at open.
//!
//! Containers that list every sample up front (FILM) or that are scanned
//! into such a list at open (RoQ) share this cursor. The table doubles as
//! a [`ChunkIndex`] so callers can inspect it like any other index.

use super::{DemuxContext, Fill};
use crate::av::{FourCC, Packet};
use crate::error::{DemuxError, Result};
use crate::index::{stream_number, ChunkIndex, IndexEntry, AVIIF_KEYFRAME};
use crate::io::{ByteSourceExt, DataRegion};
use crate::seek::{SeekOutcome, SeekRequest};
use log::{debug, warn};

/// One sample: a whole packet stored contiguously.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// `NNxx` tag naming the stream.
    pub tag: FourCC,
    pub offset: u64,
    pub len: u32,
    pub pts: f64,
    pub key: bool,
}

impl Sample {
    pub fn stream(&self) -> Option<u32> {
        stream_number(self.tag)
    }
}

/// Tag for stream `number`, `NNdc` for video and `NNwb` for audio.
pub fn sample_tag(number: u32, video: bool) -> FourCC {
    let digits = [b'0' + (number / 10 % 10) as u8, b'0' + (number % 10) as u8];
    let suffix = if video { *b"dc" } else { *b"wb" };
    FourCC([digits[0], digits[1], suffix[0], suffix[1]])
}

#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    samples: Vec<Sample>,
    index: ChunkIndex,
    cursor: usize,
    /// Stream whose keyframes seeks land on.
    reference: Option<u32>,
}

impl SampleTable {
    /// Keeps the samples inside `region`, in file order.
    pub fn new(mut samples: Vec<Sample>, region: DataRegion, reference: Option<u32>) -> Self {
        let before = samples.len();
        samples.retain(|s| region.contains(s.offset));
        if samples.len() < before {
            warn!("{} samples lie outside the data region", before - samples.len());
        }
        samples.sort_by_key(|s| s.offset);
        let entries = samples
            .iter()
            .map(|s| IndexEntry::new(s.tag, s.offset, s.len, if s.key { AVIIF_KEYFRAME } else { 0 }))
            .collect();
        Self {
            index: ChunkIndex::build(entries, region),
            samples,
            cursor: 0,
            reference,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    /// Last timestamp in the table.
    pub fn max_pts(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.pts).reduce(f64::max)
    }

    /// Reads samples in file order until one reaches a selected stream.
    pub fn fill(&mut self, ctx: &mut DemuxContext<'_>) -> Result<Fill> {
        while let Some(sample) = self.samples.get(self.cursor).copied() {
            self.cursor += 1;
            let Some(number) = sample.stream() else {
                continue;
            };
            if !ctx.streams.is_selected(number) {
                continue;
            }
            if ctx.source.tell() != sample.offset {
                ctx.source.seek(sample.offset)?;
            }
            let data = match ctx.source.read_bytes(sample.len as usize) {
                Ok(data) => data,
                Err(DemuxError::ShortRead { got, .. }) => {
                    warn!(
                        "sample of stream {} at {} cut short after {} bytes",
                        number, sample.offset, got
                    );
                    ctx.diag.skipped_records += 1;
                    return Ok(Fill::EndOfData);
                }
                Err(e) => return Err(e),
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
        Ok(Fill::EndOfData)
    }

    /// Keyframe of the reference stream at or before `target`, or the first
    /// keyframe when `target` precedes them all.
    fn key_for(&self, target: f64) -> Option<usize> {
        let keys = self
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.key && (self.reference.is_none() || s.stream() == self.reference));
        let mut first = None;
        let mut best = None;
        for (i, s) in keys {
            first.get_or_insert(i);
            if s.pts <= target {
                best = Some(i);
            }
        }
        best.or(first)
    }

    /// Moves the cursor to the keyframe for `req`. Other streams restart
    /// from their last sample not after that keyframe, so none of their
    /// data is lost to interleaving.
    pub fn seek(
        &mut self,
        ctx: &mut DemuxContext<'_>,
        req: SeekRequest,
        current: f64,
        duration: Option<f64>,
    ) -> Result<SeekOutcome> {
        let Some(target) = req.target_time(current, duration) else {
            return Ok(SeekOutcome::Unsupported);
        };
        let Some(key) = self.key_for(target) else {
            return Ok(SeekOutcome::Unsupported);
        };
        let key_pts = self.samples[key].pts;
        let mut pos = key;
        for (i, s) in self.samples[..key].iter().enumerate().rev() {
            if s.stream() != self.samples[key].stream() && s.pts <= key_pts {
                pos = i;
                break;
            }
        }
        let clamped = (req.amount < 0.0 && target <= 0.0) || duration.map(|d| target > d).unwrap_or(false);
        self.cursor = pos;
        let offset = self.samples[pos].offset;
        ctx.source.seek(offset)?;
        debug!("sample table: seek to {:.3}s lands on sample {} at {}", target, pos, offset);
        Ok(SeekOutcome::Moved {
            pos: offset,
            clamped,
        })
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sample_tags() {
        assert_eq!(sample_tag(0, true), FourCC::new(b"00dc"));
        assert_eq!(sample_tag(1, false), FourCC::new(b"01wb"));
        assert_eq!(sample_tag(1, false).0[..2], *b"01");
    }

    #[test]
    fn test_table_sorted_and_keyed() {
        let video = sample_tag(0, true);
        let audio = sample_tag(1, false);
        let samples = vec![
            Sample { tag: video, offset: 300, len: 10, pts: 1.0, key: false },
            Sample { tag: video, offset: 100, len: 10, pts: 0.0, key: true },
            Sample { tag: audio, offset: 200, len: 10, pts: 0.0, key: true },
            Sample { tag: audio, offset: 9000, len: 10, pts: 9.0, key: true },
        ];
        let table = SampleTable::new(samples, DataRegion::new(50, 1000), Some(0));
        let offsets: Vec<u64> = table.samples().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![100, 200, 300]);
        assert_eq!(table.index().len(), 3);
        assert!(table.index().get(0).unwrap().is_keyframe());
        assert_eq!(table.key_for(5.0), Some(0));
        assert_eq!(table.max_pts(), Some(1.0));
    }
}
