use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
}

/// Codecs the engine can negotiate. Anything outside this set fails fast
/// during SDP handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    H264,
    Vp8,
    Opus,
}

/// Output encoding of an emitted frame's bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamFormat {
    /// Annex-B NAL stream (start-code delimited)
    H264AnnexB,
    /// Raw VP8 frame (payload descriptor stripped)
    Vp8,
    /// Raw Opus packet
    Opus,
}

/// Rational time base of a track, `num / den` seconds per timestamp tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    pub num: u32,
    pub den: u32,
}

impl Timebase {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Seconds per tick as a float, for logging and duration math.
    pub fn expr(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }
}

/// A negotiated media track. Built once during DESCRIBE, immutable after.
#[derive(Debug, Clone)]
pub struct Track {
    /// Track id, equal to the RTP payload type
    pub id: u8,
    pub media_type: MediaType,
    pub codec: CodecId,
    pub timebase: Timebase,
    /// Absolute control URL used for SETUP
    pub control_url: String,
}

/// Downstream collaborator receiving negotiated tracks and decoded frames.
#[async_trait]
pub trait FrameSink: Send {
    /// Called once per track when negotiation completes.
    async fn on_track(&mut self, track: Track);

    /// Called for every assembled, depacketized frame.
    async fn on_frame(&mut self, frame: Frame);
}

mod frame;
pub use frame::*;
