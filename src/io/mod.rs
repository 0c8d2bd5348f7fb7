//! # Byte sources
//!
//! Every driver reads through the [`ByteSource`] trait. [`Source`] implements it
//! for seekable readers (files, cursors) and for forward-only readers (pipes,
//! network bodies). Forward-only sources serve probes from a lookahead buffer and
//! emulate forward seeks by skipping; backward seeks fail with
//! [`DemuxError::NotSeekable`].
//!
//! ```rust
//! use vdkdemux::io::{ByteSource, ByteSourceExt, Source};
//!
//! # fn main() -> vdkdemux::Result<()> {
//! let mut src = Source::from_bytes(b"RIFF\x04\x00\x00\x00AVI ".to_vec());
//! assert_eq!(src.peek(4)?, b"RIFF");
//! assert_eq!(src.read_fourcc()?.to_string(), "RIFF");
//! assert_eq!(src.read_u32_le()?, 4);
//! # Ok(())
//! # }
//! ```

mod source;

pub use source::Source;

use crate::av::FourCC;
use crate::error::{DemuxError, Result};
use bytes::Bytes;

/// Positioned byte input.
pub trait ByteSource: Send {
    /// Reads up to `buf.len()` bytes; fewer only at end of data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Returns up to `len` upcoming bytes without consuming them.
    fn peek(&mut self, len: usize) -> Result<&[u8]>;

    fn seek(&mut self, pos: u64) -> Result<()>;

    fn tell(&self) -> u64;

    /// A read has hit the end of the underlying data.
    fn eof(&self) -> bool;

    fn is_seekable(&self) -> bool;

    /// Total length when known.
    fn len(&self) -> Option<u64>;
}

/// Fixed-width field readers on top of [`ByteSource`].
pub trait ByteSourceExt: ByteSource {
    fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let got = self.read(buf)?;
        if got < buf.len() {
            return Err(DemuxError::ShortRead {
                wanted: buf.len(),
                got,
            });
        }
        Ok(())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; len];
        self.read_exact_into(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        let target = self.tell() + len;
        self.seek(target)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact_into(&mut b)?;
        Ok(b[0])
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact_into(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact_into(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact_into(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact_into(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact_into(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    fn read_fourcc(&mut self) -> Result<FourCC> {
        let mut b = [0u8; 4];
        self.read_exact_into(&mut b)?;
        Ok(FourCC(b))
    }
}

impl<T: ByteSource + ?Sized> ByteSourceExt for T {}

/// Byte range holding media records, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataRegion {
    pub start: u64,
    pub end: u64,
}

impl DataRegion {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn clamp(&self, offset: u64) -> u64 {
        offset.clamp(self.start, self.end.saturating_sub(1).max(self.start))
    }
}
