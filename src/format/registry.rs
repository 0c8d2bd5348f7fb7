use super::{asf, avi, film, ogg, rawdv, roq, vqf, FormatDriver, Probe};
use crate::error::{DemuxError, Result};
use crate::io::ByteSource;
use log::{debug, info};

/// Drivers in priority order; on equal confidence the earlier one wins.
static DRIVERS: &[&dyn FormatDriver] = &[
    &avi::AviDriver,
    &asf::AsfDriver,
    &ogg::OggDriver,
    &film::FilmDriver,
    &roq::RoqDriver,
    &vqf::VqfDriver,
    &rawdv::RawDvDriver,
];

pub fn drivers() -> &'static [&'static dyn FormatDriver] {
    DRIVERS
}

pub fn by_name(name: &str) -> Option<&'static dyn FormatDriver> {
    DRIVERS
        .iter()
        .copied()
        .find(|d| d.name().eq_ignore_ascii_case(name))
}

/// Picks the driver for `source`. A `hint` restricts the choice to the named
/// driver, which is accepted on any confidence above `No`.
pub fn detect(
    source: &mut dyn ByteSource,
    hint: Option<&str>,
    probe_size: usize,
) -> Result<&'static dyn FormatDriver> {
    if let Some(name) = hint {
        let driver = by_name(name).ok_or(DemuxError::FormatNotRecognized)?;
        return match driver.probe(source, probe_size)? {
            Probe::No => Err(DemuxError::FormatNotRecognized),
            _ => Ok(driver),
        };
    }

    let mut best: Option<(&'static dyn FormatDriver, Probe)> = None;
    for &driver in DRIVERS {
        let confidence = match driver.probe(source, probe_size) {
            Ok(c) => c,
            Err(e) => {
                debug!("probe {} failed: {}", driver.name(), e);
                Probe::No
            }
        };
        debug!("probe {}: {:?}", driver.name(), confidence);
        if confidence == Probe::No {
            continue;
        }
        if best.map(|(_, b)| confidence > b).unwrap_or(true) {
            best = Some((driver, confidence));
        }
    }

    let (driver, confidence) = best.ok_or(DemuxError::FormatNotRecognized)?;
    info!("detected {} ({:?})", driver.name(), confidence);
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Source;

    #[test]
    fn test_detect_by_signature() {
        let mut avi = Source::from_bytes(b"RIFF\x00\x10\x00\x00AVI LIST".to_vec());
        assert_eq!(detect(&mut avi, None, 2048).unwrap().name(), "avi");
        assert_eq!(avi.tell(), 0);

        let mut film = Source::from_bytes(b"FILM\x00\x00\x00\x30\x31\x2e\x30\x39".to_vec());
        assert_eq!(detect(&mut film, None, 2048).unwrap().name(), "film");
    }

    #[test]
    fn test_unknown_and_hint() {
        let mut junk = Source::from_bytes(vec![0x42u8; 64]);
        assert!(matches!(
            detect(&mut junk, None, 2048),
            Err(DemuxError::FormatNotRecognized)
        ));
        assert!(matches!(
            detect(&mut junk, Some("ogg"), 2048),
            Err(DemuxError::FormatNotRecognized)
        ));
        assert!(by_name("AVI").is_some());
        assert!(by_name("nut").is_none());
    }
}
