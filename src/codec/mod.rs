//! Codec-level knowledge the demuxer needs without decoding.

pub mod keyframe;

pub use keyframe::{KeyframeRule, KEYFRAME_PROBE_BYTES};
