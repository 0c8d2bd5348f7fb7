use crate::av::FourCC;
use crate::utils::{find_start_code, BitReader};

/// Bytes of payload a heuristic needs to look at.
pub const KEYFRAME_PROBE_BYTES: usize = 128;

const VOP_START: u8 = 0xB6;

/// How keyframes are recognized for a video codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeRule {
    /// Every frame decodes alone (MJPEG, DV, uncompressed, audio).
    Always,
    /// MS-MPEG4 v3 family: two-bit picture type, zero is intra.
    MsMpeg4,
    /// MPEG-4 part 2: `vop_coding_type` after the VOP start code.
    Mpeg4Part2,
    /// H.264: an IDR NAL unit or an I/SI slice.
    H264,
}

impl KeyframeRule {
    pub fn for_fourcc(tag: FourCC) -> Self {
        let mut upper = tag.0;
        upper.make_ascii_uppercase();
        match &upper {
            b"DIV3" | b"DIV4" | b"DIV5" | b"DIV6" | b"MP43" | b"MPG3" | b"AP41" | b"COL1" => {
                KeyframeRule::MsMpeg4
            }
            b"DIVX" | b"DX50" | b"XVID" | b"FMP4" | b"MP4V" | b"M4S2" | b"3IV2" => {
                KeyframeRule::Mpeg4Part2
            }
            b"H264" | b"X264" | b"AVC1" | b"DAVC" => KeyframeRule::H264,
            _ => KeyframeRule::Always,
        }
    }

    /// Guesses from the first bytes of a frame; an unreadable header is
    /// reported as non-key.
    pub fn is_keyframe(&self, head: &[u8]) -> bool {
        match self {
            KeyframeRule::Always => true,
            KeyframeRule::MsMpeg4 => {
                let mut reader = BitReader::new(head);
                matches!(reader.read_bits(2), Ok(0))
            }
            KeyframeRule::Mpeg4Part2 => match find_start_code(head, VOP_START) {
                Some(at) => {
                    let mut reader = BitReader::new(&head[at + 4..]);
                    matches!(reader.read_bits(2), Ok(0))
                }
                None => false,
            },
            KeyframeRule::H264 => h264_has_intra(head),
        }
    }
}

fn h264_has_intra(head: &[u8]) -> bool {
    nal_units(head).into_iter().any(|nal| {
        let Some(&header) = nal.first() else {
            return false;
        };
        match header & 0x1F {
            5 => true,
            1 => {
                let rbsp = strip_emulation_prevention(&nal[1..]);
                let mut reader = BitReader::new(&rbsp);
                let slice_type = reader.read_golomb().and_then(|_| reader.read_golomb());
                matches!(slice_type.map(|t| t % 5), Ok(2) | Ok(4))
            }
            _ => false,
        }
    })
}

/// Splits Annex B byte streams on start codes; anything else is read as
/// 4-byte length-prefixed NAL units.
fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let annex_b = data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1]);
    let mut units = Vec::new();

    if annex_b {
        let mut starts = Vec::new();
        let mut i = 0;
        while i + 3 <= data.len() {
            if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
                starts.push(i + 3);
                i += 3;
            } else {
                i += 1;
            }
        }
        for (n, &start) in starts.iter().enumerate() {
            let end = starts
                .get(n + 1)
                .map(|&next| next - 3)
                .unwrap_or(data.len());
            units.push(&data[start..end.max(start)]);
        }
    } else {
        let mut rest = data;
        while rest.len() > 4 {
            let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            let end = (4 + len).min(rest.len());
            units.push(&rest[4..end]);
            rest = &rest[end..];
        }
    }
    units
}

fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_lookup_is_case_insensitive() {
        assert_eq!(KeyframeRule::for_fourcc(FourCC::new(b"xvid")), KeyframeRule::Mpeg4Part2);
        assert_eq!(KeyframeRule::for_fourcc(FourCC::new(b"div3")), KeyframeRule::MsMpeg4);
        assert_eq!(KeyframeRule::for_fourcc(FourCC::new(b"MJPG")), KeyframeRule::Always);
    }

    #[test]
    fn test_mpeg4_vop_coding_type() {
        let intra = [0x00, 0x00, 0x01, 0xB0, 0x01, 0x00, 0x00, 0x01, 0xB6, 0x10];
        let predicted = [0x00, 0x00, 0x01, 0xB6, 0x50];
        assert!(KeyframeRule::Mpeg4Part2.is_keyframe(&intra));
        assert!(!KeyframeRule::Mpeg4Part2.is_keyframe(&predicted));
        assert!(!KeyframeRule::Mpeg4Part2.is_keyframe(&[0xFF; 16]));
    }

    #[test]
    fn test_msmpeg4_picture_type() {
        assert!(KeyframeRule::MsMpeg4.is_keyframe(&[0x3F]));
        assert!(!KeyframeRule::MsMpeg4.is_keyframe(&[0x40]));
        assert!(!KeyframeRule::MsMpeg4.is_keyframe(&[]));
    }

    #[test]
    fn test_h264_idr_and_slices() {
        // SPS then IDR slice
        let idr = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x65, 0x88];
        assert!(KeyframeRule::H264.is_keyframe(&idr));

        // non-IDR slice: first_mb=0 ('1'), slice_type=7 ('0001000') -> I
        let i_slice = [0, 0, 1, 0x41, 0b1000_1000, 0x00];
        assert!(KeyframeRule::H264.is_keyframe(&i_slice));

        // non-IDR slice: first_mb=0, slice_type=0 ('1') -> P
        let p_slice = [0, 0, 1, 0x41, 0b1100_0000];
        assert!(!KeyframeRule::H264.is_keyframe(&p_slice));

        // length-prefixed IDR
        let avc = [0, 0, 0, 2, 0x65, 0x88];
        assert!(KeyframeRule::H264.is_keyframe(&avc));
    }

    #[test]
    fn test_emulation_prevention() {
        assert_eq!(strip_emulation_prevention(&[0, 0, 3, 1, 0, 0, 3]), vec![0, 0, 1, 0, 0]);
    }
}
