mod common;

#[cfg(test)]
mod tests {
    use super::common::{asf_file, asf_packet, vorbis_file, AsfPayload, AviBuilder, Record};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;
    use vdkdemux::av::StreamKind;
    use vdkdemux::config::DemuxConfig;
    use vdkdemux::io::Source;
    use vdkdemux::{Demuxer, DemuxError, Result};

    fn avi_bytes() -> Vec<u8> {
        let records = (0..4u8)
            .flat_map(|i| [Record::video(vec![i; 32], true), Record::audio(vec![i; 16])])
            .collect();
        AviBuilder {
            audio: true,
            idx1: true,
            ..AviBuilder::new(records)
        }
        .build()
        .bytes
    }

    fn asf_bytes() -> Vec<u8> {
        let packet = asf_packet(&[AsfPayload::Piece {
            stream: 1,
            key: true,
            object: 0,
            offset: 0,
            object_size: 64,
            time_ms: 100,
            data: vec![7; 64],
        }]);
        asf_file(&[packet], 1)
    }

    fn detected(bytes: Vec<u8>) -> Result<&'static str> {
        Demuxer::open(Source::from_bytes(bytes), None, DemuxConfig::default()).map(|d| d.format_name())
    }

    #[test]
    fn test_each_container_is_recognized() -> Result<()> {
        assert_eq!(detected(avi_bytes())?, "avi");
        assert_eq!(detected(vorbis_file(2).bytes)?, "ogg");
        assert_eq!(detected(asf_bytes())?, "asf");
        Ok(())
    }

    #[test]
    fn test_unknown_bytes_are_rejected() {
        let mut junk = vec![0x42u8; 4096];
        junk[..4].copy_from_slice(b"JUNK");
        assert!(matches!(detected(junk), Err(DemuxError::FormatNotRecognized)));
        assert!(matches!(detected(Vec::new()), Err(DemuxError::FormatNotRecognized)));
    }

    #[test]
    fn test_hint_restricts_detection() -> Result<()> {
        let ogg = vorbis_file(2).bytes;
        let wrong = Demuxer::open(Source::from_bytes(ogg.clone()), Some("avi"), DemuxConfig::default());
        assert!(matches!(wrong, Err(DemuxError::FormatNotRecognized)));
        let unknown = Demuxer::open(Source::from_bytes(ogg.clone()), Some("mkv"), DemuxConfig::default());
        assert!(matches!(unknown, Err(DemuxError::FormatNotRecognized)));

        let right = Demuxer::open(Source::from_bytes(ogg), Some("OGG"), DemuxConfig::default())?;
        assert_eq!(right.format_name(), "ogg");
        Ok(())
    }

    #[test]
    fn test_open_path_reads_from_disk() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("clip.avi");
        fs::write(&path, avi_bytes())?;

        let mut demuxer = Demuxer::open_path(&path, DemuxConfig::default())?;
        assert_eq!(demuxer.format_name(), "avi");
        assert!(demuxer.is_seekable());
        let video = demuxer.default_stream(StreamKind::Video).unwrap();
        let audio = demuxer.default_stream(StreamKind::Audio).unwrap();
        assert_eq!((video, audio), (0, 1));

        let mut frames = 0;
        while demuxer.next_packet(video)?.is_some() {
            frames += 1;
        }
        let mut chunks = 0;
        while demuxer.next_packet(audio)?.is_some() {
            chunks += 1;
        }
        assert_eq!((frames, chunks), (4, 4));
        Ok(())
    }

    #[test]
    fn test_deselected_stream_is_not_queued() -> Result<()> {
        let mut demuxer = Demuxer::open(Source::from_bytes(avi_bytes()), None, DemuxConfig::default())?;
        demuxer.select_stream(1, false)?;
        while demuxer.next_packet(0)?.is_some() {}
        assert_eq!(demuxer.diagnostics().dropped_packets, 0);
        assert!(!demuxer.stream(1).map(|s| s.is_selected()).unwrap_or(true));
        assert!(matches!(demuxer.next_packet(9), Err(DemuxError::UnknownStream(9))));
        Ok(())
    }
}
