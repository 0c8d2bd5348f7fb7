use super::{CodecData, FourCC, Packet};
use crate::config::QueueConfig;
use crate::error::{DemuxError, Result};
use bytes::Bytes;
use log::{debug, warn};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Audio,
    Video,
    Subtitle,
}

/// Codec identity as the container names it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecTag {
    /// RIFF/QuickTime style four-character code.
    FourCC(FourCC),
    /// WAVEFORMATEX format tag.
    Wave(u16),
    /// Formats whose containers use a signature string instead of a code.
    Named(&'static str),
}

/// Rational seconds-per-unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn to_seconds(&self, units: f64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        units * self.num as f64 / self.den as f64
    }

    pub fn units_per_second(&self) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        self.den as f64 / self.num as f64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        TimeBase::new(1, 1000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioParams {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub avg_bytes_per_sec: u32,
}

/// Pending packets of one stream, oldest first.
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: VecDeque<Packet>,
    bytes: usize,
}

impl PacketQueue {
    pub fn push(&mut self, packet: Packet) {
        self.bytes += packet.len();
        self.packets.push_back(packet);
    }

    pub fn pop(&mut self) -> Option<Packet> {
        let packet = self.packets.pop_front()?;
        self.bytes -= packet.len();
        Some(packet)
    }

    pub fn front(&self) -> Option<&Packet> {
        self.packets.front()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// One elementary stream and its pending packets.
///
/// The codec-init blob is fixed at construction; there is no setter.
#[derive(Debug)]
pub struct Stream {
    id: u32,
    kind: StreamKind,
    codec: CodecTag,
    extra_data: Bytes,
    pub time_base: TimeBase,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
    pub name: Option<String>,
    queue: PacketQueue,
    last_pts: Option<f64>,
    eof: bool,
    selected: bool,
}

impl Stream {
    pub fn new(id: u32, kind: StreamKind, codec: CodecTag) -> Self {
        Self {
            id,
            kind,
            codec,
            extra_data: Bytes::new(),
            time_base: TimeBase::default(),
            video: None,
            audio: None,
            name: None,
            queue: PacketQueue::default(),
            last_pts: None,
            eof: false,
            selected: false,
        }
    }

    pub fn with_extra_data(mut self, data: impl Into<Bytes>) -> Self {
        self.extra_data = data.into();
        self
    }

    pub fn with_time_base(mut self, time_base: TimeBase) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn with_video(mut self, video: VideoParams) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_audio(mut self, audio: AudioParams) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn codec(&self) -> &CodecTag {
        &self.codec
    }

    pub fn last_pts(&self) -> Option<f64> {
        self.last_pts
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }
}

impl CodecData for Stream {
    fn codec_tag(&self) -> &CodecTag {
        &self.codec
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn width(&self) -> Option<u32> {
        self.video.map(|v| v.width)
    }

    fn height(&self) -> Option<u32> {
        self.video.map(|v| v.height)
    }

    fn audio_params(&self) -> Option<&AudioParams> {
        self.audio.as_ref()
    }

    fn extra_data(&self) -> &[u8] {
        &self.extra_data
    }
}

/// The streams of one demuxer instance.
///
/// The first video and the first audio stream are selected when registered;
/// packets for unselected streams are dropped on push.
#[derive(Debug)]
pub struct StreamSet {
    streams: Vec<Stream>,
    limits: QueueConfig,
}

impl StreamSet {
    pub fn new(limits: QueueConfig) -> Self {
        Self {
            streams: Vec::new(),
            limits,
        }
    }

    pub fn add(&mut self, mut stream: Stream) -> Result<()> {
        if self.get(stream.id).is_some() {
            return Err(DemuxError::HeaderMalformed(format!(
                "duplicate stream id {}",
                stream.id
            )));
        }
        let kind_taken = self
            .streams
            .iter()
            .any(|s| s.kind == stream.kind && s.selected);
        stream.selected = stream.kind != StreamKind::Subtitle && !kind_taken;
        debug!(
            "stream {}: {:?} {:?} selected={}",
            stream.id, stream.kind, stream.codec, stream.selected
        );
        self.streams.push(stream);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&Stream> {
        self.streams.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut Stream> {
        self.streams.iter_mut().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn select(&mut self, id: u32, selected: bool) -> Result<()> {
        let stream = self.get_mut(id).ok_or(DemuxError::UnknownStream(id))?;
        stream.selected = selected;
        if !selected {
            stream.queue.clear();
        }
        Ok(())
    }

    pub fn is_selected(&self, id: u32) -> bool {
        self.get(id).map(|s| s.selected).unwrap_or(false)
    }

    /// First selected stream of `kind`.
    pub fn selected_of_kind(&self, kind: StreamKind) -> Option<u32> {
        self.streams
            .iter()
            .find(|s| s.kind == kind && s.selected)
            .map(|s| s.id)
    }

    /// Queues `packet` on its stream. Returns `false` when the packet was
    /// dropped because the stream is unknown or unselected.
    pub fn push(&mut self, packet: Packet) -> bool {
        match self.get_mut(packet.stream_id) {
            Some(stream) if stream.selected => {
                stream.last_pts = Some(packet.pts);
                stream.queue.push(packet);
                true
            }
            _ => false,
        }
    }

    pub fn pop(&mut self, id: u32) -> Option<Packet> {
        self.get_mut(id)?.queue.pop()
    }

    pub fn front(&self, id: u32) -> Option<&Packet> {
        self.get(id)?.queue.front()
    }

    pub fn queued(&self, id: u32) -> usize {
        self.get(id).map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Whether one more packet of `len` bytes would exceed the queue limits.
    pub fn would_overflow(&self, id: u32, len: usize) -> bool {
        match self.get(id) {
            Some(s) => {
                s.queue.len() + 1 > self.limits.max_packets
                    || s.queue.bytes() + len > self.limits.max_bytes
            }
            None => false,
        }
    }

    /// Drops the oldest packets of every stream other than `keep` that is over
    /// its limits. Returns how many packets were dropped.
    pub fn enforce_limits(&mut self, keep: u32) -> usize {
        let limits = self.limits.clone();
        let mut dropped = 0;
        for stream in self.streams.iter_mut().filter(|s| s.id != keep) {
            while stream.queue.len() > limits.max_packets || stream.queue.bytes() > limits.max_bytes {
                if stream.queue.pop().is_none() {
                    break;
                }
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!("queue limit reached, dropped {} packets", dropped);
        }
        dropped
    }

    pub fn set_eof(&mut self, id: u32) {
        if let Some(stream) = self.get_mut(id) {
            stream.eof = true;
        }
    }

    pub fn set_all_eof(&mut self) {
        for stream in &mut self.streams {
            stream.eof = true;
        }
    }

    /// Discards every pending packet and clears end-of-stream state.
    pub fn reset(&mut self) {
        for stream in &mut self.streams {
            stream.queue.clear();
            stream.eof = false;
            stream.last_pts = None;
        }
    }
}
