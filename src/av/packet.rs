use bytes::Bytes;

/// One demuxed elementary-stream unit.
///
/// `pts` is in seconds; `pos` is the byte offset of the record that carried
/// the packet (the first fragment for reassembled packets).
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub data: Bytes,
    pub pts: f64,
    pub pos: u64,
    pub stream_id: u32,
    pub is_key: bool,
    /// Set when the packet was flushed before all of its fragments arrived.
    pub is_corrupt: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: 0.0,
            pos: 0,
            stream_id: 0,
            is_key: false,
            is_corrupt: false,
        }
    }

    pub fn with_pts(mut self, pts: f64) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_pos(mut self, pos: u64) -> Self {
        self.pos = pos;
        self
    }

    pub fn with_stream_id(mut self, id: u32) -> Self {
        self.stream_id = id;
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn with_corrupt_flag(mut self, is_corrupt: bool) -> Self {
        self.is_corrupt = is_corrupt;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
