//! # Utility Functions and Types
//!
//! - [`BitReader`] for the bit-level keyframe heuristics
//! - [`OggCrc`] for Ogg page validation
//!
//! ```rust
//! use vdkdemux::utils::OggCrc;
//!
//! let crc = OggCrc::new();
//! assert_eq!(crc.calculate(b"123456789"), 0x89A1_897F);
//! ```

/// Bitstream reading
pub mod bits;

/// Page checksums
pub mod crc;

pub use bits::{find_start_code, BitReader};
pub use crc::OggCrc;
