mod fourcc;
mod packet;
mod stream;

pub use fourcc::FourCC;
pub use packet::*;
pub use stream::*;

/// What a decoder needs to know about a stream before the first packet.
pub trait CodecData: Send {
    fn codec_tag(&self) -> &CodecTag;
    fn kind(&self) -> StreamKind;
    fn width(&self) -> Option<u32>;
    fn height(&self) -> Option<u32>;
    fn audio_params(&self) -> Option<&AudioParams>;
    /// Codec-init blob copied verbatim from the container header.
    fn extra_data(&self) -> &[u8];
}
