//! Syncpoint table construction and duration discovery.

use super::codec::Ident;
use super::page::{Page, PageReader};
use crate::error::Result;
use crate::index::{Syncpoint, SyncpointTable};
use crate::io::{ByteSource, DataRegion};
use crate::av::StreamKind;
use log::{debug, info};

/// Bytes read from the end of the file to find the last granule.
const TAIL_WINDOW: u64 = 64 * 1024;
const TAIL_ATTEMPTS: u32 = 4;

/// Whether a packet that can be decoded on its own starts on `page`.
fn unit_starts(page: &Page, ident: &Ident) -> bool {
    page.pieces()
        .iter()
        .enumerate()
        .filter(|(i, _)| !(*i == 0 && page.is_continued()))
        .any(|(_, piece)| ident.kind != StreamKind::Video || ident.is_keyframe(&piece.data))
}

/// Walks every page of the data region and records a syncpoint for each
/// page of the reference stream on which a decodable unit starts. The
/// source is left wherever the scan stopped.
pub fn scan_syncpoints(
    src: &mut dyn ByteSource,
    reader: &mut PageReader,
    region: DataRegion,
    serial: u32,
    ident: &Ident,
) -> Result<SyncpointTable> {
    src.seek(region.start)?;
    let mut table = SyncpointTable::new();
    let mut prev_units: Option<i64> = None;
    let mut pages = 0u64;

    while let Some(page) = reader.next_page(src, region.end)? {
        pages += 1;
        if page.serial != serial {
            continue;
        }
        let Some(units) = ident.granule_units(page.granule) else {
            continue;
        };
        table.observe_pts(ident.units_to_pts(units));

        if unit_starts(&page, ident) {
            let key = if ident.kind == StreamKind::Video {
                ident.granule_key(page.granule).unwrap_or(units)
            } else {
                prev_units.unwrap_or(0).min(units)
            };
            table.push(Syncpoint {
                key,
                pts: ident.units_to_pts(key),
                offset: page.pos,
            });
        }
        prev_units = Some(units);
    }
    info!(
        "ogg: {} syncpoints over {} pages, duration {:.3}s",
        table.len(),
        pages,
        table.max_pts().unwrap_or(0.0)
    );
    Ok(table)
}

/// Presentation end of the reference stream, read from the last pages of
/// the file. The source is left wherever the scan stopped.
pub fn tail_duration(
    src: &mut dyn ByteSource,
    reader: &mut PageReader,
    region: DataRegion,
    serial: u32,
    ident: &Ident,
) -> Result<Option<f64>> {
    if region.end == u64::MAX {
        return Ok(None);
    }
    let mut window = TAIL_WINDOW;
    for _ in 0..TAIL_ATTEMPTS {
        let from = region.end.saturating_sub(window).max(region.start);
        src.seek(from)?;
        let mut last = None;
        while let Some(page) = reader.next_page(src, region.end)? {
            if page.serial == serial && page.granule >= 0 {
                last = Some(page.granule);
            }
        }
        if let Some(granule) = last {
            let pts = ident.granule_pts(granule);
            debug!("ogg: last granule {} in the final {} bytes", granule, window);
            return Ok(pts);
        }
        if from == region.start {
            break;
        }
        window *= 4;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::super::codec::identify;
    use super::super::page::{write_page, FLAG_BOS};
    use super::*;
    use crate::io::Source;
    use pretty_assertions::assert_eq;

    fn vorbis_ident() -> Ident {
        let mut p = b"\x01vorbis".to_vec();
        p.extend_from_slice(&0u32.to_le_bytes());
        p.push(1);
        p.extend_from_slice(&1000u32.to_le_bytes());
        p.extend_from_slice(&[0; 12]);
        p.extend_from_slice(&[0xb8, 1]);
        identify(&p).unwrap()
    }

    #[test]
    fn test_audio_syncpoints_and_duration() {
        let ident = vorbis_ident();
        let mut data = Vec::new();
        write_page(&mut data, FLAG_BOS, 0, 5, 0, &[b"head"], false);
        let start = data.len() as u64;
        let mut offsets = Vec::new();
        for i in 1..=4i64 {
            offsets.push(data.len() as u64);
            write_page(&mut data, 0, i * 500, 5, i as u32, &[&[1u8; 40], &[2u8; 40]], false);
            // another stream's page in between
            write_page(&mut data, 0, i * 10, 6, i as u32, &[b"xx"], false);
        }
        let region = DataRegion::new(start, data.len() as u64);
        let mut src = Source::from_bytes(data);
        let mut reader = PageReader::new();

        let table = scan_syncpoints(&mut src, &mut reader, region, 5, &ident).unwrap();
        let got: Vec<(i64, u64)> = table.points().iter().map(|p| (p.key, p.offset)).collect();
        assert_eq!(
            got,
            vec![(0, offsets[0]), (500, offsets[1]), (1000, offsets[2]), (1500, offsets[3])]
        );
        assert_eq!(table.max_pts(), Some(2.0));

        let tail = tail_duration(&mut src, &mut reader, region, 5, &ident).unwrap();
        assert_eq!(tail, Some(2.0));
    }
}
