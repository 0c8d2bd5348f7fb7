#![doc(html_root_url = "https://docs.rs/vdkdemux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # vdkdemux - container demultiplexing and seek indices
//!
//! `vdkdemux` turns a byte stream in one of several container formats into
//! timestamped elementary-stream packets, and builds or recovers the indices
//! needed to seek, even in truncated files or files written by buggy muxers.
//!
//! ## Formats
//!
//! - AVI, including OpenDML (>1 GB) and non-interleaved files; index recovery
//!   by linear scan with a persisted side-file
//! - ASF/WMV/WMA with fragment reassembly and audio descrambling
//! - Ogg (Vorbis, Theora, Opus, FLAC, Speex, OGM) with a syncpoint table
//! - Sega FILM, Id RoQ, raw DV and TwinVQ (VQF)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vdkdemux::{DemuxConfig, Demuxer, SeekRequest};
//! use vdkdemux::av::StreamKind;
//!
//! fn main() -> vdkdemux::Result<()> {
//!     let mut demuxer = Demuxer::open_path("movie.avi", DemuxConfig::default())?;
//!     let video = demuxer.default_stream(StreamKind::Video).expect("no video");
//!
//!     demuxer.seek(SeekRequest::fraction(0.5))?;
//!     while let Some(packet) = demuxer.next_packet(video)? {
//!         println!("{:8.3}s {:6} bytes key={}", packet.pts, packet.len(), packet.is_key);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `io`: the byte source abstraction the drivers read through
//! - `av`: packets, streams and per-stream queues
//! - `format`: the driver interface, registry, fragment reassembler and the
//!   container drivers
//! - `index`: chunk indices, the index side-file and syncpoint tables
//! - `seek`: seek requests and target arithmetic
//! - `config`: demuxer tunables
//! - `codec`: keyframe heuristics used during index recovery

/// Packets, streams and queues
pub mod av;

/// Keyframe heuristics
pub mod codec;

/// Demuxer tunables
pub mod config;

mod demuxer;

/// Error types and utilities
pub mod error;

/// Container format drivers
pub mod format;

/// Seek indices
pub mod index;

/// Byte sources
pub mod io;

/// Seek requests
pub mod seek;

/// Common utilities and helper functions
pub mod utils;

pub use config::DemuxConfig;
pub use demuxer::Demuxer;
pub use error::{DemuxError, Result};
pub use seek::{SeekOutcome, SeekRequest};
