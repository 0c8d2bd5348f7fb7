mod common;

#[cfg(test)]
mod tests {
    use super::common::{asf_file, asf_packet, AsfPayload, ASF_PACKET_SIZE};
    use pretty_assertions::assert_eq;
    use vdkdemux::av::StreamKind;
    use vdkdemux::config::DemuxConfig;
    use vdkdemux::format::{Query, QueryAnswer};
    use vdkdemux::io::Source;
    use vdkdemux::{Demuxer, Result, SeekOutcome, SeekRequest};

    const AUDIO: u32 = 1;
    const VIDEO: u32 = 2;

    /// A video object split over two packets, a packet carrying one object
    /// of each stream, and a grouped payload of three audio frames.
    fn sample() -> Vec<u8> {
        let packets = vec![
            asf_packet(&[AsfPayload::Piece {
                stream: 2,
                key: true,
                object: 1,
                offset: 0,
                object_size: 300,
                time_ms: 1100,
                data: vec![0xa0; 200],
            }]),
            asf_packet(&[AsfPayload::Piece {
                stream: 2,
                key: true,
                object: 1,
                offset: 200,
                object_size: 300,
                time_ms: 1100,
                data: vec![0xa1; 100],
            }]),
            asf_packet(&[
                AsfPayload::Piece {
                    stream: 1,
                    key: true,
                    object: 1,
                    offset: 0,
                    object_size: 50,
                    time_ms: 1100,
                    data: vec![0x10; 50],
                },
                AsfPayload::Piece {
                    stream: 2,
                    key: false,
                    object: 2,
                    offset: 0,
                    object_size: 40,
                    time_ms: 1140,
                    data: vec![0xb0; 40],
                },
            ]),
            asf_packet(&[AsfPayload::Group {
                stream: 1,
                object: 2,
                time_ms: 1200,
                items: vec![vec![0x20; 20], vec![0x21; 20], vec![0x22; 20]],
            }]),
        ];
        asf_file(&packets, 4)
    }

    #[test]
    fn test_streams_from_header() -> Result<()> {
        let mut demuxer = Demuxer::open(Source::from_bytes(sample()), None, DemuxConfig::default())?;
        assert_eq!(demuxer.format_name(), "asf");
        assert_eq!(demuxer.default_stream(StreamKind::Audio), Some(AUDIO));
        assert_eq!(demuxer.default_stream(StreamKind::Video), Some(VIDEO));
        assert_eq!(demuxer.query(Query::Duration), QueryAnswer::Value(4.0));
        assert_eq!(demuxer.data_region().len(), 4 * ASF_PACKET_SIZE as u64);
        Ok(())
    }

    #[test]
    fn test_objects_are_reassembled_across_packets() -> Result<()> {
        let mut demuxer = Demuxer::open(Source::from_bytes(sample()), None, DemuxConfig::default())?;
        let start = demuxer.data_region().start;

        let first = demuxer.next_packet(VIDEO)?.unwrap();
        assert_eq!(first.len(), 300);
        assert!(first.data[..200].iter().all(|&b| b == 0xa0));
        assert!(first.data[200..].iter().all(|&b| b == 0xa1));
        assert_eq!((first.pts, first.is_key, first.pos), (1.0, true, start));

        let second = demuxer.next_packet(VIDEO)?.unwrap();
        assert_eq!((second.len(), second.pts, second.is_key), (40, 1.04, false));
        assert!(demuxer.next_packet(VIDEO)?.is_none());

        let audio: Vec<(usize, u8, f64)> = std::iter::from_fn(|| demuxer.next_packet(AUDIO).ok().flatten())
            .map(|p| (p.len(), p.data[0], p.pts))
            .collect();
        assert_eq!(
            audio,
            vec![(50, 0x10, 1.0), (20, 0x20, 1.1), (20, 0x21, 1.1), (20, 0x22, 1.1)]
        );

        let diag = demuxer.diagnostics();
        assert_eq!((diag.broken_fragments, diag.offset_mismatches), (0, 0));
        Ok(())
    }

    #[test]
    fn test_fraction_seek_aligns_to_packets() -> Result<()> {
        let mut demuxer = Demuxer::open(Source::from_bytes(sample()), None, DemuxConfig::default())?;
        let start = demuxer.data_region().start;
        let outcome = demuxer.seek(SeekRequest::fraction(0.5))?;
        assert_eq!(
            outcome,
            SeekOutcome::Moved {
                pos: start + 2 * ASF_PACKET_SIZE as u64,
                clamped: false
            }
        );
        Ok(())
    }
}
