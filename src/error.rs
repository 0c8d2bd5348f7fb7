use thiserror::Error;

/// Errors produced while probing, demuxing, indexing or seeking.
#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format not recognized")]
    FormatNotRecognized,

    #[error("malformed header: {0}")]
    HeaderMalformed(String),

    #[error("index unavailable")]
    IndexUnavailable,

    #[error("index rejected: {0}")]
    IndexRejected(String),

    #[error("broken fragment: {0}")]
    BrokenFragment(String),

    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    #[error("end of data")]
    EndOfData,

    #[error("seek target unreachable")]
    SeekTargetUnreachable,

    #[error("source is not seekable")]
    NotSeekable,

    #[error("unknown stream id {0}")]
    UnknownStream(u32),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DemuxError {
    /// Per-record failures that a driver absorbs by skipping the record.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DemuxError::BrokenFragment(_) | DemuxError::ShortRead { .. } | DemuxError::InvalidData(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DemuxError>;
