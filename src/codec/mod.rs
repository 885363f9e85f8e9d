//! Per-codec RTP depacketizers.
//!
//! A depacketizer turns the ordered RTP payload fragments of one access unit
//! into a single elementary bitstream. One instance is created per declared
//! payload type at DESCRIBE time and reused for the life of the stream.

use crate::av::{BitstreamFormat, CodecId};
use crate::Result;
use bytes::Bytes;

mod h264;
mod opus;
mod vp8;

pub use h264::H264Depacketizer;
pub use opus::OpusDepacketizer;
pub use vp8::Vp8Depacketizer;

/// Closed dispatch over the codecs the engine supports.
#[derive(Debug)]
pub enum Depacketizer {
    H264(H264Depacketizer),
    Vp8(Vp8Depacketizer),
    Opus(OpusDepacketizer),
}

impl Depacketizer {
    pub fn new(codec: CodecId) -> Self {
        match codec {
            CodecId::H264 => Self::H264(H264Depacketizer::new()),
            CodecId::Vp8 => Self::Vp8(Vp8Depacketizer::new()),
            CodecId::Opus => Self::Opus(OpusDepacketizer::new()),
        }
    }

    /// Assembles one access unit from its ordered RTP payload fragments.
    pub fn depacketize(&mut self, payloads: &[Bytes]) -> Result<Bytes> {
        match self {
            Self::H264(d) => d.depacketize(payloads),
            Self::Vp8(d) => d.depacketize(payloads),
            Self::Opus(d) => d.depacketize(payloads),
        }
    }

    /// The output encoding of frames produced by this depacketizer.
    pub fn bitstream_format(&self) -> BitstreamFormat {
        match self {
            Self::H264(_) => BitstreamFormat::H264AnnexB,
            Self::Vp8(_) => BitstreamFormat::Vp8,
            Self::Opus(_) => BitstreamFormat::Opus,
        }
    }
}
