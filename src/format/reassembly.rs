use crate::av::Packet;
use bytes::BytesMut;
use log::debug;

/// One piece of a logical packet as the container delivered it.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    pub stream_id: u32,
    /// Logical-packet sequence number (ASF media object number, Ogg packet
    /// counter).
    pub seq: u32,
    /// Byte offset of this piece inside the logical packet, when the
    /// container states it.
    pub offset: Option<u32>,
    /// Full logical-packet size, when the container states it.
    pub total_len: Option<u32>,
    pub data: &'a [u8],
    pub pts: f64,
    pub pos: u64,
    pub keyframe: bool,
    /// The container marks this piece as the packet's last.
    pub last: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub fragments: u64,
    pub packets: u64,
    pub broken: u64,
    pub offset_mismatches: u64,
    pub incomplete: u64,
}

#[derive(Debug)]
struct Pending {
    stream_id: u32,
    seq: u32,
    total_len: Option<u32>,
    buf: BytesMut,
    pts: f64,
    pos: u64,
    keyframe: bool,
}

impl Pending {
    fn start(frag: &Fragment<'_>) -> Self {
        let mut buf = BytesMut::with_capacity(
            frag.total_len.map(|t| t as usize).unwrap_or(frag.data.len()),
        );
        buf.extend_from_slice(frag.data);
        Self {
            stream_id: frag.stream_id,
            seq: frag.seq,
            total_len: frag.total_len,
            buf,
            pts: frag.pts,
            pos: frag.pos,
            keyframe: frag.keyframe,
        }
    }

    fn is_full(&self) -> bool {
        self.total_len
            .map(|t| self.buf.len() >= t as usize)
            .unwrap_or(false)
    }

    fn into_packet(self, complete: bool) -> Packet {
        Packet::new(self.buf.freeze())
            .with_stream_id(self.stream_id)
            .with_pts(self.pts)
            .with_pos(self.pos)
            .with_key_flag(self.keyframe)
            .with_corrupt_flag(!complete)
    }
}

/// Rebuilds logical packets of one stream from container fragments.
///
/// At most one packet is in progress. A fragment with a new sequence number
/// flushes it as-is, marked corrupt.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Option<Pending>,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment; completed or flushed packets go to `emit`.
    pub fn push(&mut self, frag: Fragment<'_>, mut emit: impl FnMut(Packet)) {
        self.stats.fragments += 1;

        if frag.data.is_empty() {
            self.stats.broken += 1;
            debug!(
                "stream {}: empty fragment for seq {}, flushing",
                frag.stream_id, frag.seq
            );
            if let Some(packet) = self.flush() {
                emit(packet);
            }
            return;
        }

        let same_seq = self
            .pending
            .as_ref()
            .map(|p| p.seq == frag.seq)
            .unwrap_or(false);

        if same_seq {
            if let Some(pending) = self.pending.as_mut() {
                let have = pending.buf.len() as u32;
                if let Some(offset) = frag.offset {
                    if offset != have {
                        self.stats.offset_mismatches += 1;
                        debug!(
                            "stream {}: seq {} fragment offset {} != {}",
                            frag.stream_id, frag.seq, offset, have
                        );
                    }
                }
                pending.buf.extend_from_slice(frag.data);
            }
        } else {
            if let Some(packet) = self.flush() {
                emit(packet);
            }
            if let Some(offset) = frag.offset.filter(|&o| o > 0) {
                self.stats.broken += 1;
                debug!(
                    "stream {}: seq {} starts at offset {}, head lost",
                    frag.stream_id, frag.seq, offset
                );
                return;
            }
            self.pending = Some(Pending::start(&frag));
        }

        let done = frag.last || self.pending.as_ref().map(Pending::is_full).unwrap_or(false);
        if done {
            if let Some(pending) = self.pending.take() {
                self.stats.packets += 1;
                emit(pending.into_packet(true));
            }
        }
    }

    /// Emits the in-progress packet, if any, marked corrupt.
    pub fn flush(&mut self) -> Option<Packet> {
        let pending = self.pending.take()?;
        self.stats.packets += 1;
        self.stats.incomplete += 1;
        Some(pending.into_packet(false))
    }

    /// Emits the in-progress packet as complete. For containers that end a
    /// packet with an empty terminator.
    pub fn finish(&mut self) -> Option<Packet> {
        let pending = self.pending.take()?;
        self.stats.packets += 1;
        Some(pending.into_packet(true))
    }

    /// Discards the in-progress packet.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frag<'a>(seq: u32, offset: u32, data: &'a [u8], last: bool) -> Fragment<'a> {
        Fragment {
            stream_id: 1,
            seq,
            offset: Some(offset),
            total_len: None,
            data,
            pts: seq as f64,
            pos: 100 + offset as u64,
            keyframe: offset == 0,
            last,
        }
    }

    #[test]
    fn test_concatenates_fragments() {
        let mut r = Reassembler::new();
        let mut out = Vec::new();
        r.push(frag(7, 0, b"abc", false), |p| out.push(p));
        r.push(frag(7, 3, b"def", false), |p| out.push(p));
        r.push(frag(7, 6, b"g", true), |p| out.push(p));
        // trailing short read for the next object
        r.push(frag(8, 0, b"", false), |p| out.push(p));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.as_ref(), b"abcdefg");
        assert_eq!(out[0].pos, 100);
        assert!(out[0].is_key);
        assert!(!out[0].is_corrupt);
        assert_eq!(r.stats().broken, 1);
    }

    #[test]
    fn test_new_sequence_flushes_partial() {
        let mut r = Reassembler::new();
        let mut out = Vec::new();
        r.push(frag(1, 0, b"xx", false), |p| out.push(p));
        r.push(frag(2, 0, b"yy", false), |p| out.push(p));

        assert_eq!(out.len(), 1);
        assert!(out[0].is_corrupt);
        assert!(r.has_pending());
        assert_eq!(r.stats().incomplete, 1);
    }

    #[test]
    fn test_headless_fragment_dropped() {
        let mut r = Reassembler::new();
        let mut out = Vec::new();
        r.push(frag(4, 10, b"tail", true), |p| out.push(p));
        assert!(out.is_empty());
        assert!(!r.has_pending());
        assert_eq!(r.stats().broken, 1);
    }

    #[test]
    fn test_total_length_completes_and_mismatch_counted() {
        let mut r = Reassembler::new();
        let mut out = Vec::new();
        let mut first = frag(3, 0, b"1234", false);
        first.total_len = Some(8);
        let mut second = frag(3, 5, b"5678", false);
        second.total_len = Some(8);

        r.push(first, |p| out.push(p));
        r.push(second, |p| out.push(p));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.as_ref(), b"12345678");
        assert_eq!(r.stats().offset_mismatches, 1);
    }
}
