use super::ByteSource;
use crate::error::{DemuxError, Result};
use log::trace;
use std::fs::File;
use std::io::{BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

const SKIP_CHUNK: usize = 64 * 1024;

trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

enum Backing {
    Seekable(Box<dyn ReadSeek>),
    Forward(Box<dyn Read + Send>),
}

impl Backing {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let res = match self {
                Backing::Seekable(r) => r.read(buf),
                Backing::Forward(r) => r.read(buf),
            };
            match res {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

/// Buffered [`ByteSource`] over a reader.
///
/// `lookahead` holds bytes already pulled from the reader that start at
/// `pos`; the reader itself sits at `pos + lookahead.len()`.
pub struct Source {
    backing: Backing,
    lookahead: Vec<u8>,
    pos: u64,
    len: Option<u64>,
    eof: bool,
}

impl Source {
    pub fn new<R: Read + Seek + Send + 'static>(mut reader: R) -> Result<Self> {
        let start = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(start))?;
        Ok(Self {
            backing: Backing::Seekable(Box::new(reader)),
            lookahead: Vec::new(),
            pos: start,
            len: Some(end),
            eof: false,
        })
    }

    /// Source that can only move forward.
    pub fn forward_only<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            backing: Backing::Forward(Box::new(reader)),
            lookahead: Vec::new(),
            pos: 0,
            len: None,
            eof: false,
        }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self {
            backing: Backing::Seekable(Box::new(Cursor::new(data))),
            lookahead: Vec::new(),
            pos: 0,
            len: Some(len),
            eof: false,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }

    fn fill_lookahead(&mut self, want: usize) -> Result<()> {
        let mut chunk = [0u8; 4096];
        while self.lookahead.len() < want {
            let need = (want - self.lookahead.len()).min(chunk.len());
            let got = self.backing.read(&mut chunk[..need])?;
            if got == 0 {
                self.eof = true;
                break;
            }
            self.lookahead.extend_from_slice(&chunk[..got]);
        }
        Ok(())
    }

    fn skip_forward(&mut self, mut count: u64) -> Result<()> {
        let from_lookahead = (count.min(self.lookahead.len() as u64)) as usize;
        self.lookahead.drain(..from_lookahead);
        self.pos += from_lookahead as u64;
        count -= from_lookahead as u64;

        let mut scratch = vec![0u8; SKIP_CHUNK];
        while count > 0 {
            let want = count.min(SKIP_CHUNK as u64) as usize;
            let got = self.backing.read(&mut scratch[..want])?;
            if got == 0 {
                self.eof = true;
                break;
            }
            self.pos += got as u64;
            count -= got as u64;
        }
        Ok(())
    }
}

impl ByteSource for Source {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        if !self.lookahead.is_empty() {
            let take = buf.len().min(self.lookahead.len());
            buf[..take].copy_from_slice(&self.lookahead[..take]);
            self.lookahead.drain(..take);
            filled = take;
        }
        while filled < buf.len() {
            let got = self.backing.read(&mut buf[filled..])?;
            if got == 0 {
                self.eof = true;
                break;
            }
            filled += got;
        }
        self.pos += filled as u64;
        Ok(filled)
    }

    fn peek(&mut self, len: usize) -> Result<&[u8]> {
        self.fill_lookahead(len)?;
        let avail = len.min(self.lookahead.len());
        Ok(&self.lookahead[..avail])
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        let buffered_end = self.pos + self.lookahead.len() as u64;
        if pos >= self.pos && pos <= buffered_end {
            let drop = (pos - self.pos) as usize;
            self.lookahead.drain(..drop);
            self.pos = pos;
            if pos < buffered_end {
                self.eof = false;
            }
            return Ok(());
        }

        match &mut self.backing {
            Backing::Seekable(reader) => {
                trace!("seek {} -> {}", self.pos, pos);
                reader.seek(SeekFrom::Start(pos))?;
                self.lookahead.clear();
                self.pos = pos;
                self.eof = false;
                Ok(())
            }
            Backing::Forward(_) => {
                if pos < self.pos {
                    return Err(DemuxError::NotSeekable);
                }
                self.skip_forward(pos - self.pos)
            }
        }
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn eof(&self) -> bool {
        if !self.lookahead.is_empty() {
            return false;
        }
        self.eof || self.len.map(|len| self.pos >= len).unwrap_or(false)
    }

    fn is_seekable(&self) -> bool {
        matches!(self.backing, Backing::Seekable(_))
    }

    fn len(&self) -> Option<u64> {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ByteSourceExt;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_peek_does_not_consume() {
        let mut src = Source::forward_only(Cursor::new(b"OggS\x00\x02rest".to_vec()));
        assert_eq!(src.peek(4).unwrap(), b"OggS");
        assert_eq!(src.peek(64).unwrap().len(), 10);
        assert_eq!(src.tell(), 0);
        assert_eq!(src.read_fourcc().unwrap().to_string(), "OggS");
        assert_eq!(src.tell(), 4);
    }

    #[test]
    fn test_forward_only_seek() {
        let data: Vec<u8> = (0..=255u8).collect();
        let mut src = Source::forward_only(Cursor::new(data));
        src.seek(100).unwrap();
        assert_eq!(src.read_u8().unwrap(), 100);
        assert!(matches!(src.seek(10), Err(DemuxError::NotSeekable)));
        assert!(!src.is_seekable());
    }

    #[test]
    fn test_short_read_and_eof() {
        let mut src = Source::from_bytes(vec![1, 2, 3]);
        assert_eq!(src.len(), Some(3));
        match src.read_u32_le() {
            Err(DemuxError::ShortRead { wanted: 4, got: 3 }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(src.eof());

        src.seek(1).unwrap();
        assert!(!src.eof());
        assert_eq!(src.read_u16_be().unwrap(), 0x0203);
    }

    #[test]
    fn test_seek_inside_lookahead() {
        let mut src = Source::from_bytes(b"0123456789".to_vec());
        src.peek(8).unwrap();
        src.seek(3).unwrap();
        assert_eq!(src.read_bytes(2).unwrap().as_ref(), b"34");
        src.seek(0).unwrap();
        assert_eq!(src.read_bytes(1).unwrap().as_ref(), b"0");
    }
}
