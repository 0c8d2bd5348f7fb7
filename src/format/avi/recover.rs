//! Index regeneration by walking the data region record by record.

use super::header::{LIST, RIFF};
use crate::codec::{KeyframeRule, KEYFRAME_PROBE_BYTES};
use crate::error::Result;
use crate::index::{stream_number, IndexEntry, AVIIF_KEYFRAME};
use crate::io::{ByteSource, ByteSourceExt, DataRegion};
use log::{debug, info, trace};

#[derive(Debug, Default)]
pub struct Recovery {
    pub entries: Vec<IndexEntry>,
    /// Records whose tag named no known stream.
    pub skipped: u64,
}

/// Scans `region` and records every chunk of a stream listed in `rules`
/// (indexed by stream number). A record that runs past the end of the
/// region is not recorded.
pub fn recover_index(
    src: &mut dyn ByteSource,
    region: DataRegion,
    rules: &[Option<KeyframeRule>],
) -> Result<Recovery> {
    info!("avi: regenerating index over {}..{}", region.start, region.end);
    src.seek(region.start)?;
    let mut out = Recovery::default();

    loop {
        let pos = src.tell();
        if pos + 8 > region.end {
            break;
        }
        let (id, len) = match (src.read_fourcc(), src.read_u32_le()) {
            (Ok(id), Ok(len)) => (id, len),
            _ => break,
        };
        if id == LIST || id == RIFF {
            if src.read_fourcc().is_err() {
                break;
            }
            continue;
        }
        if id.0 == [0; 4] {
            // zero padding: step one dword at a time
            src.seek(pos + 4)?;
            continue;
        }

        let end = pos + 8 + len as u64;
        if end > region.end {
            debug!("avi: record {} at {} truncated, scan stops", id, pos);
            break;
        }

        let rule = stream_number(id).and_then(|n| rules.get(n as usize).copied().flatten());
        match rule {
            Some(rule) => {
                let key = if len == 0 {
                    false
                } else {
                    let head = src.peek((len as usize).min(KEYFRAME_PROBE_BYTES))?;
                    rule.is_keyframe(head)
                };
                trace!("avi: recovered {} at {} len {} key {}", id, pos, len, key);
                let flags = if key { AVIIF_KEYFRAME } else { 0 };
                out.entries.push(IndexEntry::new(id, pos, len, flags));
            }
            None => out.skipped += 1,
        }
        src.seek(pos + 8 + ((len as u64 + 1) & !1))?;
    }

    info!(
        "avi: recovered {} index entries, {} foreign records",
        out.entries.len(),
        out.skipped
    );
    Ok(out)
}
