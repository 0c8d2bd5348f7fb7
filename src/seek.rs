//! Seek requests and the arithmetic shared by the drivers.

use crate::io::DataRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekFlags {
    /// Amount is measured from the start, not from the current position.
    pub absolute: bool,
    /// Amount is a fraction 0.0..=1.0 of the whole file instead of seconds.
    pub factor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    pub amount: f64,
    pub flags: SeekFlags,
}

impl SeekRequest {
    pub fn relative(secs: f64) -> Self {
        Self {
            amount: secs,
            flags: SeekFlags::default(),
        }
    }

    pub fn absolute(secs: f64) -> Self {
        Self {
            amount: secs.max(0.0),
            flags: SeekFlags {
                absolute: true,
                factor: false,
            },
        }
    }

    /// Absolute position as a fraction of the file.
    pub fn fraction(f: f64) -> Self {
        Self {
            amount: f.clamp(0.0, 1.0),
            flags: SeekFlags {
                absolute: true,
                factor: true,
            },
        }
    }

    /// Target in seconds given the current position and, for fractional
    /// requests, the duration. Never negative.
    pub fn target_time(&self, current: f64, duration: Option<f64>) -> Option<f64> {
        let base = if self.flags.absolute { 0.0 } else { current };
        let delta = if self.flags.factor {
            self.amount * duration?
        } else {
            self.amount
        };
        Some((base + delta).max(0.0))
    }

    /// Target byte offset inside `region`, using `bytes_per_sec` for time
    /// requests. Returns the offset and whether it had to be clamped.
    pub fn target_offset(
        &self,
        region: DataRegion,
        current: u64,
        bytes_per_sec: Option<f64>,
    ) -> Option<(u64, bool)> {
        let base = if self.flags.absolute {
            region.start as f64
        } else {
            current as f64
        };
        let delta = if self.flags.factor {
            self.amount * region.len() as f64
        } else {
            self.amount * bytes_per_sec?
        };
        Some(clamp_offset(region, base + delta))
    }
}

/// Clamps a fractional byte position into the region.
pub fn clamp_offset(region: DataRegion, target: f64) -> (u64, bool) {
    if target < region.start as f64 {
        return (region.start, true);
    }
    let last = region.end.saturating_sub(1).max(region.start);
    if target > last as f64 {
        return (last, true);
    }
    (target as u64, false)
}

/// Aligns `offset` down to a multiple of `unit` counted from `region.start`.
pub fn align_down(region: DataRegion, offset: u64, unit: u64) -> u64 {
    if unit == 0 || offset <= region.start {
        return region.start;
    }
    region.start + (offset - region.start) / unit * unit
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekOutcome {
    /// The source now sits at `pos`.
    Moved { pos: u64, clamped: bool },
    /// Seeking is not possible for this source or file.
    Unsupported,
}

/// What the facade does to the freshly reset queues after a driver seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncPolicy {
    /// The driver positioned every stream exactly.
    None,
    /// Drop video until a keyframe; audio already lines up.
    VideoKeyframe,
    /// Drop video until a keyframe, then audio until it reaches the video.
    VideoKeyframeThenAudio,
}
